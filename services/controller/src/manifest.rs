//! Desired-state manifests.
//!
//! Every `*.toml` file in the manifest directory may declare any number of
//! instances as arrays of tables:
//!
//! ```toml
//! [[organization]]
//! name = "platform"
//! admins = ["alice@example.com"]
//!
//! [[folder]]
//! name = "platform-ops"
//! org_ref = "platform"
//! title = "Operations"
//!
//! [[datasource]]
//! name = "prometheus"
//! org_ref = "platform"
//! type = "prometheus"
//! url = "http://prometheus:9090"
//!
//! [[dashboard]]
//! name = "overview"
//! org_ref = "platform"
//! folder_ref = "platform-ops"
//! config_json = '{"title": "Overview"}'
//! ```
//!
//! `name` identifies an instance within its kind across passes; it is the
//! key of its status record.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use grafops_id::{FolderSelector, OrgId};
use serde::Deserialize;

use crate::secrets::SecretRef;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, rename = "organization")]
    pub organizations: Vec<OrganizationManifest>,
    #[serde(default, rename = "folder")]
    pub folders: Vec<FolderManifest>,
    #[serde(default, rename = "datasource")]
    pub datasources: Vec<DataSourceManifest>,
    #[serde(default, rename = "dashboard")]
    pub dashboards: Vec<DashboardManifest>,
}

/// Where an org-scoped instance lives: a literal organization ID, or the
/// name of a managed Organization. Neither means the main organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrgRef<'a> {
    pub org_id: Option<OrgId>,
    pub org_ref: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationManifest {
    pub name: String,
    /// Organization name in Grafana, when it differs from `name`.
    #[serde(default)]
    pub grafana_name: Option<String>,
    #[serde(default)]
    pub admin_user: Option<String>,
    #[serde(default)]
    pub create_users: Option<bool>,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub editors: Vec<String>,
    #[serde(default)]
    pub viewers: Vec<String>,
    #[serde(default)]
    pub users_without_access: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderManifest {
    pub name: String,
    #[serde(default)]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub org_ref: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub parent_folder_uid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceManifest {
    pub name: String,
    #[serde(default)]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub org_ref: Option<String>,
    #[serde(default)]
    pub grafana_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub access_mode: Option<String>,
    #[serde(default)]
    pub basic_auth_enabled: Option<bool>,
    #[serde(default)]
    pub basic_auth_username: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub json_data_encoded: Option<String>,
    #[serde(default)]
    pub http_headers_secret_ref: Option<SecretRef>,
    #[serde(default)]
    pub secure_json_data_encoded_secret_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardManifest {
    pub name: String,
    #[serde(default)]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub org_ref: Option<String>,
    pub config_json: String,
    #[serde(default)]
    pub folder: Option<FolderSelector>,
    /// Name of a managed Folder.
    #[serde(default)]
    pub folder_ref: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub overwrite: Option<bool>,
}

macro_rules! org_scoped {
    ($($manifest:ty),+) => {
        $(impl $manifest {
            pub fn org(&self) -> OrgRef<'_> {
                OrgRef {
                    org_id: self.org_id,
                    org_ref: self.org_ref.as_deref(),
                }
            }
        })+
    };
}

org_scoped!(FolderManifest, DataSourceManifest, DashboardManifest);

impl Manifest {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("invalid manifest TOML")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("failed to parse manifest: {}", path.display()))
    }

    /// Loads and merges every `*.toml` file in `dir`, in file name order.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("failed to read manifest directory: {}", dir.display()))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read manifest directory: {}", dir.display()))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged = Self::default();
        for path in &paths {
            merged.extend(Self::from_path(path)?);
        }
        merged.validate()?;
        Ok(merged)
    }

    fn extend(&mut self, other: Self) {
        self.organizations.extend(other.organizations);
        self.folders.extend(other.folders);
        self.datasources.extend(other.datasources);
        self.dashboards.extend(other.dashboards);
    }

    /// Rejects empty and duplicate instance names within a kind.
    pub fn validate(&self) -> Result<()> {
        check_names("organization", self.organizations.iter().map(|m| m.name.as_str()))?;
        check_names("folder", self.folders.iter().map(|m| m.name.as_str()))?;
        check_names("datasource", self.datasources.iter().map(|m| m.name.as_str()))?;
        check_names("dashboard", self.dashboards.iter().map(|m| m.name.as_str()))?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.organizations.is_empty()
            && self.folders.is_empty()
            && self.datasources.is_empty()
            && self.dashboards.is_empty()
    }
}

fn check_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for name in names {
        if name.trim().is_empty() {
            bail!("{kind} with an empty name");
        }
        if !seen.insert(name) {
            bail!("duplicate {kind} '{name}'");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafops_id::{FolderId, Uid};

    const FULL: &str = r#"
[[organization]]
name = "platform"
admins = ["alice@example.com"]
viewers = ["bob@example.com"]
create_users = false

[[folder]]
name = "ops"
org_ref = "platform"
title = "Operations"

[[datasource]]
name = "prom"
org_id = 3
type = "prometheus"
url = "http://prom:9090"
json_data_encoded = '{"httpMethod": "POST"}'
http_headers_secret_ref = { name = "prom-headers" }
secure_json_data_encoded_secret_ref = { name = "prom-secure", key = "json" }

[[dashboard]]
name = "overview"
folder = 7
config_json = '{"title": "Overview"}'

[[dashboard]]
name = "latency"
folder = "ops-uid"
overwrite = true
config_json = '{"title": "Latency"}'
"#;

    #[test]
    fn test_parse_every_kind() {
        let manifest = Manifest::from_toml_str(FULL).unwrap();

        assert_eq!(manifest.organizations[0].admins, vec!["alice@example.com"]);
        assert_eq!(manifest.organizations[0].create_users, Some(false));
        assert_eq!(manifest.folders[0].org().org_ref, Some("platform"));
        assert_eq!(manifest.datasources[0].org().org_id, Some(OrgId::new(3)));
        assert_eq!(manifest.datasources[0].kind, "prometheus");
        assert_eq!(
            manifest.datasources[0]
                .secure_json_data_encoded_secret_ref
                .as_ref()
                .unwrap()
                .key_or("x"),
            "json"
        );
        assert_eq!(manifest.dashboards[0].folder, Some(FolderSelector::Id(FolderId::new(7))));
        assert_eq!(
            manifest.dashboards[1].folder,
            Some(FolderSelector::Uid(Uid::parse("ops-uid").unwrap()))
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = Manifest::from_toml_str(
            r#"
[[folder]]
name = "ops"
colour = "blue"
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let manifest = Manifest::from_toml_str(
            r#"
[[folder]]
name = "ops"

[[folder]]
name = "ops"
"#,
        )
        .unwrap();
        assert!(manifest.validate().unwrap_err().to_string().contains("duplicate folder 'ops'"));
    }

    #[test]
    fn test_load_dir_merges_toml_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), "[[folder]]\nname = \"a\"\n").unwrap();
        std::fs::write(dir.path().join("b.toml"), "[[folder]]\nname = \"b\"\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "[[folder]]").unwrap();

        let manifest = Manifest::load_dir(dir.path()).unwrap();
        let names: Vec<_> = manifest.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicates_across_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), "[[folder]]\nname = \"a\"\n").unwrap();
        std::fs::write(dir.path().join("b.toml"), "[[folder]]\nname = \"a\"\n").unwrap();

        assert!(Manifest::load_dir(dir.path()).is_err());
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load_dir(&dir.path().join("absent")).is_err());
    }
}
