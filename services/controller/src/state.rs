//! Status record store.
//!
//! One JSON file holds the status record of every managed instance, keyed
//! by kind and instance name, together with its last condition. It is the
//! only state the controller persists between passes.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Managed resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Organization,
    Folder,
    DataSource,
    Dashboard,
}

impl Kind {
    /// Dependency order: every kind may reference the kinds before it.
    pub const APPLY_ORDER: [Kind; 4] = [Self::Organization, Self::Folder, Self::DataSource, Self::Dashboard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Folder => "folder",
            Self::DataSource => "datasource",
            Self::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the last pass over one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum Condition {
    Synced,
    Error(String),
}

impl Condition {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub status: Value,
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateFile {
    records: BTreeMap<Kind, BTreeMap<String, Record>>,
}

impl StateFile {
    /// Loads the store, or starts empty when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read state file: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid state file: {}", path.display()))
    }

    /// Writes the store through a temporary file so a crash never leaves a
    /// truncated file behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("failed to encode state")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn record(&self, kind: Kind, name: &str) -> Option<&Record> {
        self.records.get(&kind)?.get(name)
    }

    /// Decodes the status of one instance, or the empty status if none is
    /// recorded.
    pub fn status<S>(&self, kind: Kind, name: &str) -> Result<S, serde_json::Error>
    where
        S: DeserializeOwned + Default,
    {
        match self.record(kind, name) {
            Some(record) => serde_json::from_value(record.status.clone()),
            None => Ok(S::default()),
        }
    }

    /// Replaces the record of one instance.
    pub fn put<S: Serialize>(
        &mut self,
        kind: Kind,
        name: &str,
        status: &S,
        condition: Condition,
        last_outcome: Option<&str>,
    ) -> Result<()> {
        let status = serde_json::to_value(status).with_context(|| format!("failed to encode {kind} '{name}' status"))?;
        self.records.entry(kind).or_default().insert(
            name.to_string(),
            Record {
                status,
                condition,
                last_outcome: last_outcome.map(str::to_string),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Marks an instance failed without touching its status.
    pub fn set_condition(&mut self, kind: Kind, name: &str, condition: Condition) {
        let record = self
            .records
            .entry(kind)
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| Record {
                status: Value::Object(Default::default()),
                condition: Condition::Synced,
                last_outcome: None,
                updated_at: Utc::now(),
            });
        record.condition = condition;
        record.updated_at = Utc::now();
    }

    pub fn remove(&mut self, kind: Kind, name: &str) -> Option<Record> {
        let records = self.records.get_mut(&kind)?;
        let removed = records.remove(name);
        if records.is_empty() {
            self.records.remove(&kind);
        }
        removed
    }

    /// Names of every recorded instance of `kind`.
    pub fn names(&self, kind: Kind) -> Vec<String> {
        self.records
            .get(&kind)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }
}
