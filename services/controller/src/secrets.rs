//! Secret source for sensitive data source fields.
//!
//! Secrets are mounted as directories: `<root>/<secret>/<key>` holds the
//! value of one key. A whole secret reads as a key to value map, which is how
//! HTTP headers are supplied.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use grafops_reconcile::{ReconcileError, ReconcileResult};
use serde::{Deserialize, Serialize};

/// Points at one secret, and optionally at one key inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

impl SecretRef {
    /// Key to read when the reference names a single value.
    pub fn key_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.key.as_deref().unwrap_or(default)
    }
}

pub trait SecretSource: Send + Sync {
    /// Reads one key of a secret.
    fn read_key(&self, secret: &str, key: &str) -> ReconcileResult<String>;

    /// Reads every key of a secret.
    fn read_all(&self, secret: &str) -> ReconcileResult<BTreeMap<String, String>>;
}

/// Reads secrets from a mounted directory tree.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    root: PathBuf,
}

impl FileSecretSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn secret_dir(&self, secret: &str) -> ReconcileResult<PathBuf> {
        if !is_plain_name(secret) {
            return Err(ReconcileError::Secret(format!("invalid secret name '{secret}'")));
        }
        Ok(self.root.join(secret))
    }
}

/// Rejects names that would escape the secrets root.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn read_value(path: &Path) -> ReconcileResult<String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| ReconcileError::Secret(format!("failed to read {}: {e}", path.display())))?;
    // mounted files commonly end with a newline
    Ok(raw.trim_end_matches(['\n', '\r']).to_string())
}

impl SecretSource for FileSecretSource {
    fn read_key(&self, secret: &str, key: &str) -> ReconcileResult<String> {
        if !is_plain_name(key) {
            return Err(ReconcileError::Secret(format!("invalid key '{key}' in secret '{secret}'")));
        }
        read_value(&self.secret_dir(secret)?.join(key))
    }

    fn read_all(&self, secret: &str) -> ReconcileResult<BTreeMap<String, String>> {
        let dir = self.secret_dir(secret)?;
        let entries = fs::read_dir(&dir)
            .map_err(|e| ReconcileError::Secret(format!("failed to list {}: {e}", dir.display())))?;

        let mut values = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| ReconcileError::Secret(format!("failed to list {}: {e}", dir.display())))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // mount tooling keeps bookkeeping entries such as `..data`
            if name.starts_with('.') || !path.is_file() {
                continue;
            }
            values.insert(name.to_string(), read_value(&path)?);
        }
        Ok(values)
    }
}

/// In-memory secrets, keyed by secret then key.
impl SecretSource for BTreeMap<String, BTreeMap<String, String>> {
    fn read_key(&self, secret: &str, key: &str) -> ReconcileResult<String> {
        self.read_all(secret)?
            .remove(key)
            .ok_or_else(|| ReconcileError::Secret(format!("secret '{secret}' has no key '{key}'")))
    }

    fn read_all(&self, secret: &str) -> ReconcileResult<BTreeMap<String, String>> {
        self.get(secret)
            .cloned()
            .ok_or_else(|| ReconcileError::Secret(format!("secret '{secret}' not found")))
    }
}
