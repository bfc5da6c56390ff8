//! Wire models for the Grafana HTTP API.

use std::collections::BTreeMap;
use std::fmt;

use grafops_id::{DashboardId, DataSourceId, FolderId, FolderSelector, OrgId, Uid, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a user inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrgRole {
    Admin,
    Editor,
    Viewer,
    /// Member without access to any resource.
    None,
}

impl OrgRole {
    pub const ALL: [OrgRole; 4] = [Self::Admin, Self::Editor, Self::Viewer, Self::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Editor => "Editor",
            Self::Viewer => "Viewer",
            Self::None => "None",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    pub id: OrgId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateOrgResponse {
    pub org_id: OrgId,
}

/// Membership of one user in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUser {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub email: String,
    #[serde(default)]
    pub login: String,
    pub role: OrgRole,
}

/// A user as listed by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreateUserResponse {
    pub id: UserId,
}

/// The user the client is authenticated as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInUser {
    pub id: UserId,
    #[serde(default)]
    pub login: String,
    /// Organization the session currently acts in.
    pub org_id: OrgId,
}

/// A data source as returned by Grafana.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: DataSourceId,
    #[serde(default)]
    pub uid: String,
    pub org_id: OrgId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub basic_auth: bool,
    #[serde(default)]
    pub basic_auth_user: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub json_data: Value,
    /// Which secure keys are set. Values are never returned.
    #[serde(default)]
    pub secure_json_fields: BTreeMap<String, bool>,
    #[serde(default)]
    pub version: i64,
}

impl DataSource {
    /// Keys of secure fields that are currently set.
    pub fn secure_keys(&self) -> impl Iterator<Item = &str> {
        self.secure_json_fields
            .iter()
            .filter(|(_, set)| **set)
            .map(|(k, _)| k.as_str())
    }
}

/// Body of a data source create or update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub access: String,
    pub url: String,
    pub user: String,
    pub database: String,
    pub basic_auth: bool,
    pub basic_auth_user: String,
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub json_data: Value,
    pub secure_json_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DataSourceEnvelope {
    pub datasource: DataSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub uid: Uid,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub parent_uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFolder {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent_uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderUpdate {
    pub title: String,
    pub version: i64,
}

/// Kind filter for the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Dashboard,
    Folder,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dash-db",
            Self::Folder => "dash-folder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub kind: SearchKind,
    pub query: String,
    pub folder: Option<FolderSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: i64,
    pub uid: Uid,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub folder_id: Option<FolderId>,
    #[serde(default)]
    pub folder_uid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMeta {
    #[serde(default)]
    pub folder_id: Option<FolderId>,
    #[serde(default)]
    pub folder_uid: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: i64,
}

/// A dashboard with its model and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub dashboard: Value,
    pub meta: DashboardMeta,
}

impl Dashboard {
    pub fn uid(&self) -> Option<&str> {
        self.dashboard.get("uid").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<DashboardId> {
        self.dashboard.get("id").and_then(Value::as_i64).map(DashboardId::new)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDashboard {
    pub dashboard: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_uid: Option<Uid>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub overwrite: bool,
}

impl SaveDashboard {
    pub fn in_folder(mut self, folder: Option<&FolderSelector>) -> Self {
        match folder {
            Some(FolderSelector::Id(id)) => self.folder_id = Some(*id),
            Some(FolderSelector::Uid(uid)) => self.folder_uid = Some(uid.clone()),
            None => {}
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedDashboard {
    pub id: DashboardId,
    pub uid: Uid,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datasource_decodes_grafana_shape() {
        let ds: DataSource = serde_json::from_value(json!({
            "id": 3,
            "uid": "abc",
            "orgId": 1,
            "name": "prom",
            "type": "prometheus",
            "access": "proxy",
            "url": "http://prom:9090",
            "basicAuth": false,
            "isDefault": true,
            "jsonData": {"httpMethod": "POST"},
            "secureJsonFields": {"password": true, "token": false},
            "version": 2
        }))
        .unwrap();

        assert_eq!(ds.id, DataSourceId::new(3));
        assert_eq!(ds.kind, "prometheus");
        assert_eq!(ds.secure_keys().collect::<Vec<_>>(), vec!["password"]);
        assert_eq!(ds.user, "");
    }

    #[test]
    fn test_org_user_role_decodes() {
        let user: OrgUser = serde_json::from_value(json!({
            "orgId": 2, "userId": 7, "email": "a@x.com", "login": "a", "role": "None"
        }))
        .unwrap();
        assert_eq!(user.role, OrgRole::None);
    }

    #[test]
    fn test_save_dashboard_folder_fields() {
        let body = SaveDashboard {
            dashboard: json!({"title": "t"}),
            folder_id: None,
            folder_uid: None,
            message: String::new(),
            overwrite: false,
        }
        .in_folder(Some(&FolderSelector::Uid(Uid::parse("ops").unwrap())));

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["folderUid"], "ops");
        assert!(value.get("folderId").is_none());
        assert!(value.get("message").is_none());
    }
}
