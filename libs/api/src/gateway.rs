//! Gateway traits the resource kinds are written against.
//!
//! Every call that acts inside an organization takes an explicit
//! `org: Option<OrgId>`; `None` means the session's current organization.

use async_trait::async_trait;
use grafops_id::{DataSourceId, OrgId, Uid, UserId};
use grafops_reconcile::GatewayError;

use crate::models::{
    Dashboard, DataSource, DataSourceRequest, Folder, FolderUpdate, NewFolder, NewUser, Org,
    OrgRole, OrgUser, SaveDashboard, SavedDashboard, SearchHit, SearchQuery, SignedInUser,
    UserSummary,
};

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait OrgGateway: Send + Sync {
    async fn get_org(&self, id: OrgId) -> GatewayResult<Org>;
    async fn get_org_by_name(&self, name: &str) -> GatewayResult<Org>;
    async fn create_org(&self, name: &str) -> GatewayResult<OrgId>;
    async fn delete_org(&self, id: OrgId) -> GatewayResult<()>;
    async fn list_orgs_page(&self, page: u32, per_page: u32) -> GatewayResult<Vec<Org>>;

    async fn list_org_users(&self, id: OrgId) -> GatewayResult<Vec<OrgUser>>;
    async fn add_org_user(
        &self,
        id: OrgId,
        login_or_email: &str,
        role: OrgRole,
    ) -> GatewayResult<()>;
    async fn update_org_user(&self, id: OrgId, user: UserId, role: OrgRole) -> GatewayResult<()>;
    async fn remove_org_user(&self, id: OrgId, user: UserId) -> GatewayResult<()>;
}

/// The global user directory.
#[async_trait]
pub trait DirectoryGateway: Send + Sync {
    async fn list_users_page(&self, page: u32, per_page: u32) -> GatewayResult<Vec<UserSummary>>;
    async fn create_user(&self, user: &NewUser) -> GatewayResult<UserId>;
}

/// The authenticated session.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    async fn signed_in_user(&self) -> GatewayResult<SignedInUser>;
    async fn switch_org(&self, org: OrgId) -> GatewayResult<()>;
}

#[async_trait]
pub trait DataSourceGateway: Send + Sync {
    async fn get_datasource(
        &self,
        org: Option<OrgId>,
        id: DataSourceId,
    ) -> GatewayResult<DataSource>;
    async fn get_datasource_by_name(
        &self,
        org: Option<OrgId>,
        name: &str,
    ) -> GatewayResult<DataSource>;
    async fn create_datasource(
        &self,
        org: Option<OrgId>,
        request: &DataSourceRequest,
    ) -> GatewayResult<DataSource>;
    async fn update_datasource(
        &self,
        org: Option<OrgId>,
        id: DataSourceId,
        request: &DataSourceRequest,
    ) -> GatewayResult<DataSource>;
    async fn delete_datasource(&self, org: Option<OrgId>, id: DataSourceId) -> GatewayResult<()>;
}

#[async_trait]
pub trait FolderGateway: Send + Sync {
    async fn get_folder(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<Folder>;
    async fn create_folder(&self, org: Option<OrgId>, folder: &NewFolder) -> GatewayResult<Folder>;
    async fn update_folder(
        &self,
        org: Option<OrgId>,
        uid: &Uid,
        update: &FolderUpdate,
    ) -> GatewayResult<Folder>;
    async fn delete_folder(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<()>;
}

#[async_trait]
pub trait SearchGateway: Send + Sync {
    async fn search(
        &self,
        org: Option<OrgId>,
        query: &SearchQuery,
    ) -> GatewayResult<Vec<SearchHit>>;
}

#[async_trait]
pub trait DashboardGateway: Send + Sync {
    async fn get_dashboard(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<Dashboard>;
    async fn save_dashboard(
        &self,
        org: Option<OrgId>,
        dashboard: &SaveDashboard,
    ) -> GatewayResult<SavedDashboard>;
    async fn delete_dashboard(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<()>;
}

/// Everything the controller needs from one Grafana instance.
pub trait Grafana:
    OrgGateway
    + DirectoryGateway
    + SessionGateway
    + DataSourceGateway
    + FolderGateway
    + SearchGateway
    + DashboardGateway
{
}

impl<T> Grafana for T where
    T: OrgGateway
        + DirectoryGateway
        + SessionGateway
        + DataSourceGateway
        + FolderGateway
        + SearchGateway
        + DashboardGateway
{
}
