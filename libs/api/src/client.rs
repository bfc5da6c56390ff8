//! HTTP client for the Grafana API.

use std::time::Duration;

use async_trait::async_trait;
use grafops_id::{DataSourceId, FolderSelector, OrgId, Uid, UserId};
use grafops_reconcile::GatewayError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::gateway::{
    DashboardGateway, DataSourceGateway, DirectoryGateway, FolderGateway, GatewayResult,
    OrgGateway, SearchGateway, SessionGateway,
};
use crate::models::{
    CreateOrgResponse, CreateUserResponse, Dashboard, DataSource, DataSourceEnvelope,
    DataSourceRequest, Folder, FolderUpdate, NewFolder, NewUser, Org, OrgRole, OrgUser,
    SaveDashboard, SavedDashboard, SearchHit, SearchQuery, SignedInUser, UserSummary,
};

/// Header Grafana uses to scope a request to one organization.
pub const ORG_ID_HEADER: &str = "X-Grafana-Org-Id";

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// Grafana API client authenticated with basic auth.
///
/// Cloning is cheap and shares the connection pool. Organization scope is
/// attached per request, so one client serves every organization.
#[derive(Debug, Clone)]
pub struct GrafanaClient {
    client: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

impl GrafanaClient {
    pub fn new(config: &ClientConfig) -> GatewayResult<Self> {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| GatewayError::Transport(Box::new(e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Transport(
                format!("'{}' cannot be used as a base URL", config.base_url).into(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(transport)?;

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Build a URL for an endpoint. Each segment is percent-encoded on its
    /// own, so names and UIDs may contain `/` or spaces.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // only fails for cannot-be-a-base URLs, rejected in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str], org: Option<OrgId>) -> RequestBuilder {
        let url = self.url(segments);
        debug!(%method, path = url.path(), org = ?org.map(|o| o.value()), "grafana request");
        let request = self
            .client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password));

        match org {
            Some(org) => request.header(ORG_ID_HEADER, org.to_string()),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        org: Option<OrgId>,
    ) -> GatewayResult<T> {
        self.send(self.request(Method::GET, segments, org)).await
    }

    async fn get_query<T, Q>(
        &self,
        segments: &[&str],
        org: Option<OrgId>,
        query: &Q,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.send(self.request(Method::GET, segments, org).query(query))
            .await
    }

    async fn write<T, B>(
        &self,
        method: Method,
        segments: &[&str],
        org: Option<OrgId>,
        body: &B,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(self.request(method, segments, org).json(body))
            .await
    }

    async fn delete(&self, segments: &[&str], org: Option<OrgId>) -> GatewayResult<()> {
        self.send_empty(self.request(Method::DELETE, segments, org))
            .await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<T> {
        let response = request.send().await.map_err(transport)?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))
        } else {
            Err(error_from(response).await)
        }
    }

    /// Send a request whose response body is irrelevant.
    async fn send_empty(&self, request: RequestBuilder) -> GatewayResult<()> {
        let response = request.send().await.map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await)
        }
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(Box::new(e))
    }
}

/// Grafana error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

async fn error_from(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .map(|body| body.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    GatewayError::status(status.as_u16(), message)
}

#[async_trait]
impl OrgGateway for GrafanaClient {
    async fn get_org(&self, id: OrgId) -> GatewayResult<Org> {
        self.get(&["api", "orgs", &id.to_string()], None).await
    }

    async fn get_org_by_name(&self, name: &str) -> GatewayResult<Org> {
        self.get(&["api", "orgs", "name", name], None).await
    }

    async fn create_org(&self, name: &str) -> GatewayResult<OrgId> {
        let created: CreateOrgResponse = self
            .write(Method::POST, &["api", "orgs"], None, &json!({ "name": name }))
            .await?;
        Ok(created.org_id)
    }

    async fn delete_org(&self, id: OrgId) -> GatewayResult<()> {
        self.delete(&["api", "orgs", &id.to_string()], None).await
    }

    async fn list_orgs_page(&self, page: u32, per_page: u32) -> GatewayResult<Vec<Org>> {
        self.get_query(&["api", "orgs"], None, &[("page", page), ("perpage", per_page)])
            .await
    }

    async fn list_org_users(&self, id: OrgId) -> GatewayResult<Vec<OrgUser>> {
        self.get(&["api", "orgs", &id.to_string(), "users"], Some(id))
            .await
    }

    async fn add_org_user(
        &self,
        id: OrgId,
        login_or_email: &str,
        role: OrgRole,
    ) -> GatewayResult<()> {
        let body = json!({ "loginOrEmail": login_or_email, "role": role });
        self.send_empty(
            self.request(Method::POST, &["api", "orgs", &id.to_string(), "users"], Some(id))
                .json(&body),
        )
        .await
    }

    async fn update_org_user(&self, id: OrgId, user: UserId, role: OrgRole) -> GatewayResult<()> {
        let (id_segment, user) = (id.to_string(), user.to_string());
        let segments = ["api", "orgs", id_segment.as_str(), "users", user.as_str()];
        self.send_empty(
            self.request(Method::PATCH, &segments, Some(id))
                .json(&json!({ "role": role })),
        )
        .await
    }

    async fn remove_org_user(&self, id: OrgId, user: UserId) -> GatewayResult<()> {
        let (id_segment, user) = (id.to_string(), user.to_string());
        let segments = ["api", "orgs", id_segment.as_str(), "users", user.as_str()];
        self.delete(&segments, Some(id)).await
    }
}

#[async_trait]
impl DirectoryGateway for GrafanaClient {
    async fn list_users_page(&self, page: u32, per_page: u32) -> GatewayResult<Vec<UserSummary>> {
        self.get_query(&["api", "users"], None, &[("page", page), ("perpage", per_page)])
            .await
    }

    async fn create_user(&self, user: &NewUser) -> GatewayResult<UserId> {
        let created: CreateUserResponse = self
            .write(Method::POST, &["api", "admin", "users"], None, user)
            .await?;
        Ok(created.id)
    }
}

#[async_trait]
impl SessionGateway for GrafanaClient {
    async fn signed_in_user(&self) -> GatewayResult<SignedInUser> {
        self.get(&["api", "user"], None).await
    }

    async fn switch_org(&self, org: OrgId) -> GatewayResult<()> {
        let org = org.to_string();
        let segments = ["api", "user", "using", org.as_str()];
        self.send_empty(self.request(Method::POST, &segments, None))
            .await
    }
}

#[async_trait]
impl DataSourceGateway for GrafanaClient {
    async fn get_datasource(
        &self,
        org: Option<OrgId>,
        id: DataSourceId,
    ) -> GatewayResult<DataSource> {
        self.get(&["api", "datasources", &id.to_string()], org).await
    }

    async fn get_datasource_by_name(
        &self,
        org: Option<OrgId>,
        name: &str,
    ) -> GatewayResult<DataSource> {
        self.get(&["api", "datasources", "name", name], org).await
    }

    async fn create_datasource(
        &self,
        org: Option<OrgId>,
        request: &DataSourceRequest,
    ) -> GatewayResult<DataSource> {
        let created: DataSourceEnvelope = self
            .write(Method::POST, &["api", "datasources"], org, request)
            .await?;
        Ok(created.datasource)
    }

    async fn update_datasource(
        &self,
        org: Option<OrgId>,
        id: DataSourceId,
        request: &DataSourceRequest,
    ) -> GatewayResult<DataSource> {
        let updated: DataSourceEnvelope = self
            .write(Method::PUT, &["api", "datasources", &id.to_string()], org, request)
            .await?;
        Ok(updated.datasource)
    }

    async fn delete_datasource(&self, org: Option<OrgId>, id: DataSourceId) -> GatewayResult<()> {
        self.delete(&["api", "datasources", &id.to_string()], org)
            .await
    }
}

#[async_trait]
impl FolderGateway for GrafanaClient {
    async fn get_folder(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<Folder> {
        self.get(&["api", "folders", uid.as_str()], org).await
    }

    async fn create_folder(&self, org: Option<OrgId>, folder: &NewFolder) -> GatewayResult<Folder> {
        self.write(Method::POST, &["api", "folders"], org, folder)
            .await
    }

    async fn update_folder(
        &self,
        org: Option<OrgId>,
        uid: &Uid,
        update: &FolderUpdate,
    ) -> GatewayResult<Folder> {
        self.write(Method::PUT, &["api", "folders", uid.as_str()], org, update)
            .await
    }

    async fn delete_folder(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<()> {
        self.send_empty(
            self.request(Method::DELETE, &["api", "folders", uid.as_str()], org)
                .query(&[("forceDeleteRules", "false")]),
        )
        .await
    }
}

#[async_trait]
impl SearchGateway for GrafanaClient {
    async fn search(
        &self,
        org: Option<OrgId>,
        query: &SearchQuery,
    ) -> GatewayResult<Vec<SearchHit>> {
        let mut params = vec![
            ("type", query.kind.as_str().to_string()),
            ("query", query.query.clone()),
        ];
        match &query.folder {
            Some(FolderSelector::Id(id)) => params.push(("folderIds", id.to_string())),
            Some(FolderSelector::Uid(uid)) => params.push(("folderUIDs", uid.to_string())),
            None => {}
        }

        let hits: Vec<SearchHit> = self.get_query(&["api", "search"], org, &params).await?;
        // search matches substrings; identity needs the exact title
        Ok(hits.into_iter().filter(|h| h.title == query.query).collect())
    }
}

#[async_trait]
impl DashboardGateway for GrafanaClient {
    async fn get_dashboard(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<Dashboard> {
        self.get(&["api", "dashboards", "uid", uid.as_str()], org)
            .await
    }

    async fn save_dashboard(
        &self,
        org: Option<OrgId>,
        dashboard: &SaveDashboard,
    ) -> GatewayResult<SavedDashboard> {
        self.write(Method::POST, &["api", "dashboards", "db"], org, dashboard)
            .await
    }

    async fn delete_dashboard(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<()> {
        self.delete(&["api", "dashboards", "uid", uid.as_str()], org)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> GrafanaClient {
        GrafanaClient::new(&ClientConfig {
            base_url: base_url.to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_url_building() {
        let client = client("http://grafana:3000/");
        assert_eq!(
            client.url(&["api", "orgs", "1"]).as_str(),
            "http://grafana:3000/api/orgs/1"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let client = client("http://proxy:8080/grafana/");
        assert_eq!(
            client.url(&["api", "user"]).as_str(),
            "http://proxy:8080/grafana/api/user"
        );
    }

    #[test]
    fn test_segments_are_percent_encoded() {
        let client = client("http://grafana:3000");
        assert_eq!(
            client.url(&["api", "orgs", "name", "Main Org."]).as_str(),
            "http://grafana:3000/api/orgs/name/Main%20Org."
        );
        assert_eq!(
            client.url(&["api", "datasources", "name", "a/b"]).as_str(),
            "http://grafana:3000/api/datasources/name/a%2Fb"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = GrafanaClient::new(&ClientConfig {
            base_url: "not a url".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
