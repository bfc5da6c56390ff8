//! In-memory Grafana for tests.
//!
//! [`FakeGrafana`] implements every gateway trait over a mutex-guarded state
//! that mirrors the parts of Grafana grafops touches: organizations and their
//! members, the user directory, the session's active organization, data
//! sources, folders, search, and dashboards. Every gateway call is recorded by
//! operation name, and failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use grafops_api::models::{
    Dashboard, DashboardMeta, DataSource, DataSourceRequest, Folder, FolderUpdate, NewFolder, NewUser, Org, OrgRole,
    OrgUser, SaveDashboard, SavedDashboard, SearchHit, SearchKind, SearchQuery, SignedInUser, UserSummary,
};
use grafops_api::{
    DashboardGateway, DataSourceGateway, DirectoryGateway, FolderGateway, GatewayResult, OrgGateway, SearchGateway,
    SessionGateway,
};
use grafops_id::{DashboardId, DataSourceId, FolderId, FolderSelector, OrgId, Uid, UserId};
use grafops_reconcile::GatewayError;
use serde_json::Value;

/// ID of the seeded server admin and of the seeded main organization.
pub const ADMIN_ID: i64 = 1;
pub const ADMIN_LOGIN: &str = "admin";
pub const MAIN_ORG: &str = "Main Org.";

#[derive(Debug, Clone)]
struct StoredDashboard {
    id: DashboardId,
    model: Value,
    folder_uid: Option<Uid>,
    version: i64,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    orgs: BTreeMap<OrgId, String>,
    members: BTreeMap<OrgId, BTreeMap<UserId, OrgRole>>,
    users: BTreeMap<UserId, UserSummary>,
    passwords: HashMap<UserId, String>,
    session_org: Option<OrgId>,
    datasources: BTreeMap<(OrgId, DataSourceId), DataSource>,
    folders: BTreeMap<(OrgId, Uid), Folder>,
    dashboards: BTreeMap<(OrgId, Uid), StoredDashboard>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn scope(&self, org: Option<OrgId>) -> GatewayResult<OrgId> {
        let org = org
            .or(self.session_org)
            .ok_or_else(|| GatewayError::status(401, "no active organization"))?;
        if self.orgs.contains_key(&org) {
            Ok(org)
        } else {
            Err(GatewayError::status(403, "not a member of this organization"))
        }
    }

    fn user_by_login_or_email(&self, key: &str) -> Option<UserId> {
        self.users
            .values()
            .find(|u| u.login.eq_ignore_ascii_case(key) || u.email.eq_ignore_ascii_case(key))
            .map(|u| u.id)
    }

    fn folder_uid(&self, org: OrgId, selector: &FolderSelector) -> Option<Uid> {
        match selector {
            FolderSelector::Uid(uid) => Some(uid.clone()),
            FolderSelector::Id(id) => self
                .folders
                .iter()
                .find(|((o, _), f)| *o == org && f.id == *id)
                .map(|((_, uid), _)| uid.clone()),
        }
    }

    fn dashboard_view(&self, org: OrgId, uid: &Uid, stored: &StoredDashboard) -> Dashboard {
        let folder = stored
            .folder_uid
            .as_ref()
            .and_then(|f| self.folders.get(&(org, f.clone())));
        Dashboard {
            dashboard: stored.model.clone(),
            meta: DashboardMeta {
                folder_id: folder.map(|f| f.id),
                folder_uid: stored.folder_uid.as_ref().map(|u| u.to_string()),
                url: format!("/d/{uid}"),
                version: stored.version,
            },
        }
    }
}

fn paginate<T: Clone>(items: impl Iterator<Item = T>, page: u32, per_page: u32) -> Vec<T> {
    let skip = page.saturating_sub(1) as usize * per_page as usize;
    items.skip(skip).take(per_page as usize).collect()
}

fn not_found(what: &str) -> GatewayError {
    GatewayError::status(404, format!("{what} not found"))
}

fn generated_uid(prefix: &str, id: i64) -> GatewayResult<Uid> {
    Uid::parse(&format!("{prefix}{id}")).map_err(|e| GatewayError::status(400, e.to_string()))
}

/// In-memory Grafana with one server admin and one main organization.
pub struct FakeGrafana {
    state: Mutex<State>,
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, VecDeque<GatewayError>>>,
}

impl Default for FakeGrafana {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGrafana {
    pub fn new() -> Self {
        let mut state = State::default();
        let admin = UserId::new(state.next_id());
        let main = OrgId::new(admin.value());
        state.users.insert(
            admin,
            UserSummary {
                id: admin,
                login: ADMIN_LOGIN.to_string(),
                email: "admin@localhost".to_string(),
                name: String::new(),
            },
        );
        state.orgs.insert(main, MAIN_ORG.to_string());
        state.members.entry(main).or_default().insert(admin, OrgRole::Admin);
        state.session_org = Some(main);

        Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the call, returns an injected failure if one is queued, and
    /// otherwise runs `f` against the state.
    fn op<T>(&self, name: &'static str, f: impl FnOnce(&mut State) -> GatewayResult<T>) -> GatewayResult<T> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(name);

        let injected = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        if let Some(err) = injected {
            return Err(err);
        }

        f(&mut self.state())
    }

    /// Makes the next call to `operation` fail with `status`.
    pub fn fail_next(&self, operation: &'static str, status: u16) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(operation)
            .or_default()
            .push_back(GatewayError::status(status, "injected failure"));
    }

    /// Operation names of every gateway call so far.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| **c == operation).count()
    }

    /// Mutating calls, i.e. everything that is not a read.
    pub fn mutations(&self) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| {
                !(c.starts_with("get_") || c.starts_with("list_") || *c == "search" || *c == "signed_in_user")
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn admin_id(&self) -> UserId {
        UserId::new(ADMIN_ID)
    }

    pub fn main_org(&self) -> OrgId {
        OrgId::new(ADMIN_ID)
    }

    /// Adds a user to the directory. Login, email and name are all `email`.
    pub fn seed_user(&self, email: &str) -> UserId {
        let mut state = self.state();
        let id = UserId::new(state.next_id());
        state.users.insert(
            id,
            UserSummary {
                id,
                login: email.to_string(),
                email: email.to_string(),
                name: email.to_string(),
            },
        );
        id
    }

    /// Deletes a user from the directory and every organization.
    pub fn delete_user(&self, id: UserId) {
        let mut state = self.state();
        state.users.remove(&id);
        for members in state.members.values_mut() {
            members.remove(&id);
        }
    }

    pub fn user_exists(&self, email: &str) -> bool {
        self.state().user_by_login_or_email(email).is_some()
    }

    pub fn user_password(&self, email: &str) -> Option<String> {
        let state = self.state();
        let id = state.user_by_login_or_email(email)?;
        state.passwords.get(&id).cloned()
    }

    pub fn seed_org(&self, name: &str) -> OrgId {
        let mut state = self.state();
        let id = OrgId::new(state.next_id());
        state.orgs.insert(id, name.to_string());
        state.members.entry(id).or_default();
        id
    }

    pub fn org_id(&self, name: &str) -> Option<OrgId> {
        self.state()
            .orgs
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    pub fn set_member(&self, org: OrgId, user: UserId, role: OrgRole) {
        self.state().members.entry(org).or_default().insert(user, role);
    }

    /// Members of `org` by email.
    pub fn members(&self, org: OrgId) -> BTreeMap<String, OrgRole> {
        let state = self.state();
        state
            .members
            .get(&org)
            .map(|m| {
                m.iter()
                    .filter_map(|(id, role)| state.users.get(id).map(|u| (u.email.clone(), *role)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn session_org(&self) -> Option<OrgId> {
        self.state().session_org
    }

    pub fn set_session_org(&self, org: OrgId) {
        self.state().session_org = Some(org);
    }

    pub fn datasource(&self, org: OrgId, name: &str) -> Option<DataSource> {
        self.state()
            .datasources
            .iter()
            .find(|((o, _), ds)| *o == org && ds.name == name)
            .map(|(_, ds)| ds.clone())
    }

    /// Edits a stored data source as if someone changed it in the UI.
    pub fn edit_datasource(&self, org: OrgId, name: &str, edit: impl FnOnce(&mut DataSource)) {
        let mut state = self.state();
        if let Some(ds) = state
            .datasources
            .iter_mut()
            .find(|((o, _), ds)| *o == org && ds.name == name)
            .map(|(_, ds)| ds)
        {
            edit(ds);
            ds.version += 1;
        }
    }

    pub fn folder(&self, org: OrgId, uid: &str) -> Option<Folder> {
        let uid = Uid::parse(uid).ok()?;
        self.state().folders.get(&(org, uid)).cloned()
    }

    pub fn folders(&self, org: OrgId) -> Vec<Folder> {
        self.state()
            .folders
            .iter()
            .filter(|((o, _), _)| *o == org)
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn rename_folder(&self, org: OrgId, uid: &str, title: &str) {
        let Ok(uid) = Uid::parse(uid) else {
            return;
        };
        if let Some(folder) = self.state().folders.get_mut(&(org, uid)) {
            folder.title = title.to_string();
            folder.version += 1;
        }
    }

    /// Stored dashboard model.
    pub fn dashboard(&self, org: OrgId, uid: &str) -> Option<Value> {
        let uid = Uid::parse(uid).ok()?;
        self.state().dashboards.get(&(org, uid)).map(|d| d.model.clone())
    }

    pub fn dashboards(&self, org: OrgId) -> Vec<Value> {
        self.state()
            .dashboards
            .iter()
            .filter(|((o, _), _)| *o == org)
            .map(|(_, d)| d.model.clone())
            .collect()
    }
}

#[async_trait]
impl OrgGateway for FakeGrafana {
    async fn get_org(&self, id: OrgId) -> GatewayResult<Org> {
        self.op("get_org", |s| {
            s.orgs
                .get(&id)
                .map(|name| Org { id, name: name.clone() })
                .ok_or_else(|| not_found("organization"))
        })
    }

    async fn get_org_by_name(&self, name: &str) -> GatewayResult<Org> {
        self.op("get_org_by_name", |s| {
            s.orgs
                .iter()
                .find(|(_, n)| n.as_str() == name)
                .map(|(id, n)| Org { id: *id, name: n.clone() })
                .ok_or_else(|| not_found("organization"))
        })
    }

    async fn create_org(&self, name: &str) -> GatewayResult<OrgId> {
        self.op("create_org", |s| {
            if s.orgs.values().any(|n| n == name) {
                return Err(GatewayError::status(409, "organization name taken"));
            }
            let id = OrgId::new(s.next_id());
            s.orgs.insert(id, name.to_string());
            // the creating user becomes an admin of the new organization
            s.members.entry(id).or_default().insert(UserId::new(ADMIN_ID), OrgRole::Admin);
            Ok(id)
        })
    }

    async fn delete_org(&self, id: OrgId) -> GatewayResult<()> {
        self.op("delete_org", |s| {
            if !s.orgs.contains_key(&id) {
                return Err(not_found("organization"));
            }
            if s.session_org == Some(id) {
                return Err(GatewayError::status(400, "cannot delete the current organization"));
            }
            s.orgs.remove(&id);
            s.members.remove(&id);
            s.datasources.retain(|(o, _), _| *o != id);
            s.folders.retain(|(o, _), _| *o != id);
            s.dashboards.retain(|(o, _), _| *o != id);
            Ok(())
        })
    }

    async fn list_orgs_page(&self, page: u32, per_page: u32) -> GatewayResult<Vec<Org>> {
        self.op("list_orgs_page", |s| {
            let orgs = s.orgs.iter().map(|(id, name)| Org {
                id: *id,
                name: name.clone(),
            });
            Ok(paginate(orgs, page, per_page))
        })
    }

    async fn list_org_users(&self, id: OrgId) -> GatewayResult<Vec<OrgUser>> {
        self.op("list_org_users", |s| {
            let members = s.members.get(&id).ok_or_else(|| not_found("organization"))?;
            Ok(members
                .iter()
                .filter_map(|(user_id, role)| {
                    s.users.get(user_id).map(|u| OrgUser {
                        org_id: id,
                        user_id: *user_id,
                        email: u.email.clone(),
                        login: u.login.clone(),
                        role: *role,
                    })
                })
                .collect())
        })
    }

    async fn add_org_user(&self, id: OrgId, login_or_email: &str, role: OrgRole) -> GatewayResult<()> {
        self.op("add_org_user", |s| {
            let user = s
                .user_by_login_or_email(login_or_email)
                .ok_or_else(|| not_found("user"))?;
            let members = s.members.get_mut(&id).ok_or_else(|| not_found("organization"))?;
            if members.contains_key(&user) {
                return Err(GatewayError::status(409, "user is already member of this organization"));
            }
            members.insert(user, role);
            Ok(())
        })
    }

    async fn update_org_user(&self, id: OrgId, user: UserId, role: OrgRole) -> GatewayResult<()> {
        self.op("update_org_user", |s| {
            let members = s.members.get_mut(&id).ok_or_else(|| not_found("organization"))?;
            let current = members.get_mut(&user).ok_or_else(|| not_found("organization user"))?;
            *current = role;
            Ok(())
        })
    }

    async fn remove_org_user(&self, id: OrgId, user: UserId) -> GatewayResult<()> {
        self.op("remove_org_user", |s| {
            let members = s.members.get_mut(&id).ok_or_else(|| not_found("organization"))?;
            match members.remove(&user) {
                Some(_) => Ok(()),
                None => Err(GatewayError::status(409, "user is not a member")),
            }
        })
    }
}

#[async_trait]
impl DirectoryGateway for FakeGrafana {
    async fn list_users_page(&self, page: u32, per_page: u32) -> GatewayResult<Vec<UserSummary>> {
        self.op("list_users_page", |s| Ok(paginate(s.users.values().cloned(), page, per_page)))
    }

    async fn create_user(&self, user: &NewUser) -> GatewayResult<UserId> {
        self.op("create_user", |s| {
            if s.user_by_login_or_email(&user.login).is_some() || s.user_by_login_or_email(&user.email).is_some() {
                return Err(GatewayError::status(409, "user already exists"));
            }
            let id = UserId::new(s.next_id());
            s.users.insert(
                id,
                UserSummary {
                    id,
                    login: user.login.clone(),
                    email: user.email.clone(),
                    name: user.name.clone(),
                },
            );
            s.passwords.insert(id, user.password.clone());
            Ok(id)
        })
    }
}

#[async_trait]
impl SessionGateway for FakeGrafana {
    async fn signed_in_user(&self) -> GatewayResult<SignedInUser> {
        self.op("signed_in_user", |s| {
            let org_id = s.session_org.ok_or_else(|| not_found("active organization"))?;
            Ok(SignedInUser {
                id: UserId::new(ADMIN_ID),
                login: ADMIN_LOGIN.to_string(),
                org_id,
            })
        })
    }

    async fn switch_org(&self, org: OrgId) -> GatewayResult<()> {
        self.op("switch_org", |s| {
            if !s.orgs.contains_key(&org) {
                return Err(not_found("organization"));
            }
            s.session_org = Some(org);
            Ok(())
        })
    }
}

fn secure_fields(request: &DataSourceRequest) -> BTreeMap<String, bool> {
    request
        .secure_json_data
        .as_object()
        .map(|m| m.keys().map(|k| (k.clone(), true)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl DataSourceGateway for FakeGrafana {
    async fn get_datasource(&self, org: Option<OrgId>, id: DataSourceId) -> GatewayResult<DataSource> {
        self.op("get_datasource", |s| {
            let org = s.scope(org)?;
            s.datasources
                .get(&(org, id))
                .cloned()
                .ok_or_else(|| not_found("data source"))
        })
    }

    async fn get_datasource_by_name(&self, org: Option<OrgId>, name: &str) -> GatewayResult<DataSource> {
        self.op("get_datasource_by_name", |s| {
            let org = s.scope(org)?;
            s.datasources
                .iter()
                .find(|((o, _), ds)| *o == org && ds.name == name)
                .map(|(_, ds)| ds.clone())
                .ok_or_else(|| not_found("data source"))
        })
    }

    async fn create_datasource(&self, org: Option<OrgId>, request: &DataSourceRequest) -> GatewayResult<DataSource> {
        self.op("create_datasource", |s| {
            let org = s.scope(org)?;
            if s.datasources
                .iter()
                .any(|((o, _), ds)| *o == org && ds.name == request.name)
            {
                return Err(GatewayError::status(409, "data source with the same name already exists"));
            }
            let id = DataSourceId::new(s.next_id());
            let ds = DataSource {
                id,
                uid: request.uid.clone().unwrap_or_else(|| format!("ds{id}")),
                org_id: org,
                name: request.name.clone(),
                kind: request.kind.clone(),
                access: request.access.clone(),
                url: request.url.clone(),
                user: request.user.clone(),
                database: request.database.clone(),
                basic_auth: request.basic_auth,
                basic_auth_user: request.basic_auth_user.clone(),
                is_default: request.is_default,
                json_data: request.json_data.clone(),
                secure_json_fields: secure_fields(request),
                version: 1,
            };
            s.datasources.insert((org, id), ds.clone());
            Ok(ds)
        })
    }

    async fn update_datasource(
        &self,
        org: Option<OrgId>,
        id: DataSourceId,
        request: &DataSourceRequest,
    ) -> GatewayResult<DataSource> {
        self.op("update_datasource", |s| {
            let org = s.scope(org)?;
            let ds = s
                .datasources
                .get_mut(&(org, id))
                .ok_or_else(|| not_found("data source"))?;
            if let Some(version) = request.version {
                if version != ds.version {
                    return Err(GatewayError::status(409, "data source has been updated by someone else"));
                }
            }
            ds.name = request.name.clone();
            ds.kind = request.kind.clone();
            ds.access = request.access.clone();
            ds.url = request.url.clone();
            ds.user = request.user.clone();
            ds.database = request.database.clone();
            ds.basic_auth = request.basic_auth;
            ds.basic_auth_user = request.basic_auth_user.clone();
            ds.is_default = request.is_default;
            ds.json_data = request.json_data.clone();
            ds.secure_json_fields = secure_fields(request);
            ds.version += 1;
            Ok(ds.clone())
        })
    }

    async fn delete_datasource(&self, org: Option<OrgId>, id: DataSourceId) -> GatewayResult<()> {
        self.op("delete_datasource", |s| {
            let org = s.scope(org)?;
            s.datasources
                .remove(&(org, id))
                .map(|_| ())
                .ok_or_else(|| not_found("data source"))
        })
    }
}

#[async_trait]
impl FolderGateway for FakeGrafana {
    async fn get_folder(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<Folder> {
        self.op("get_folder", |s| {
            let org = s.scope(org)?;
            s.folders
                .get(&(org, uid.clone()))
                .cloned()
                .ok_or_else(|| not_found("folder"))
        })
    }

    async fn create_folder(&self, org: Option<OrgId>, folder: &NewFolder) -> GatewayResult<Folder> {
        self.op("create_folder", |s| {
            let org = s.scope(org)?;
            let id = s.next_id();
            let uid = match &folder.uid {
                Some(uid) => Uid::parse(uid).map_err(|e| GatewayError::status(400, e.to_string()))?,
                None => generated_uid("f", id)?,
            };
            if s.folders.contains_key(&(org, uid.clone())) {
                return Err(GatewayError::status(409, "a folder with the same uid already exists"));
            }
            if s.folders
                .iter()
                .any(|((o, _), f)| *o == org && f.title == folder.title && f.parent_uid == folder.parent_uid)
            {
                return Err(GatewayError::status(409, "a folder with the same name already exists"));
            }
            let created = Folder {
                id: FolderId::new(id),
                uid: uid.clone(),
                title: folder.title.clone(),
                url: format!("/dashboards/f/{uid}"),
                version: 1,
                parent_uid: folder.parent_uid.clone(),
            };
            s.folders.insert((org, uid), created.clone());
            Ok(created)
        })
    }

    async fn update_folder(&self, org: Option<OrgId>, uid: &Uid, update: &FolderUpdate) -> GatewayResult<Folder> {
        self.op("update_folder", |s| {
            let org = s.scope(org)?;
            let folder = s
                .folders
                .get_mut(&(org, uid.clone()))
                .ok_or_else(|| not_found("folder"))?;
            if folder.version != update.version {
                return Err(GatewayError::status(412, "the folder has been changed by someone else"));
            }
            folder.title = update.title.clone();
            folder.version += 1;
            Ok(folder.clone())
        })
    }

    async fn delete_folder(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<()> {
        self.op("delete_folder", |s| {
            let org = s.scope(org)?;
            s.folders
                .remove(&(org, uid.clone()))
                .ok_or_else(|| not_found("folder"))?;
            s.dashboards
                .retain(|(o, _), d| !(*o == org && d.folder_uid.as_ref() == Some(uid)));
            Ok(())
        })
    }
}

#[async_trait]
impl SearchGateway for FakeGrafana {
    async fn search(&self, org: Option<OrgId>, query: &SearchQuery) -> GatewayResult<Vec<SearchHit>> {
        self.op("search", |s| {
            let org = s.scope(org)?;
            let folder = match &query.folder {
                Some(selector) => match s.folder_uid(org, selector) {
                    Some(uid) => Some(uid),
                    // filtering by an unknown folder matches nothing
                    None => return Ok(Vec::new()),
                },
                None => None,
            };

            let hits = match query.kind {
                SearchKind::Folder => s
                    .folders
                    .iter()
                    .filter(|((o, _), f)| *o == org && f.title == query.query)
                    .filter(|(_, f)| folder.as_ref().is_none_or(|p| f.parent_uid == p.as_str()))
                    .map(|((_, uid), f)| SearchHit {
                        id: f.id.value(),
                        uid: uid.clone(),
                        title: f.title.clone(),
                        url: f.url.clone(),
                        kind: SearchKind::Folder.as_str().to_string(),
                        folder_id: None,
                        folder_uid: (!f.parent_uid.is_empty()).then(|| f.parent_uid.clone()),
                    })
                    .collect(),
                SearchKind::Dashboard => s
                    .dashboards
                    .iter()
                    .filter(|((o, _), d)| {
                        *o == org && d.model.get("title").and_then(Value::as_str) == Some(query.query.as_str())
                    })
                    .filter(|(_, d)| folder.as_ref().is_none_or(|f| d.folder_uid.as_ref() == Some(f)))
                    .map(|((_, uid), d)| SearchHit {
                        id: d.id.value(),
                        uid: uid.clone(),
                        title: query.query.clone(),
                        url: format!("/d/{uid}"),
                        kind: SearchKind::Dashboard.as_str().to_string(),
                        folder_id: d
                            .folder_uid
                            .as_ref()
                            .and_then(|f| s.folders.get(&(org, f.clone())))
                            .map(|f| f.id),
                        folder_uid: d.folder_uid.as_ref().map(|f| f.to_string()),
                    })
                    .collect(),
            };
            Ok(hits)
        })
    }
}

#[async_trait]
impl DashboardGateway for FakeGrafana {
    async fn get_dashboard(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<Dashboard> {
        self.op("get_dashboard", |s| {
            let org = s.scope(org)?;
            let stored = s
                .dashboards
                .get(&(org, uid.clone()))
                .ok_or_else(|| not_found("dashboard"))?;
            Ok(s.dashboard_view(org, uid, stored))
        })
    }

    async fn save_dashboard(&self, org: Option<OrgId>, request: &SaveDashboard) -> GatewayResult<SavedDashboard> {
        self.op("save_dashboard", |s| {
            let org = s.scope(org)?;
            let Some(title) = request.dashboard.get("title").and_then(Value::as_str) else {
                return Err(GatewayError::status(400, "dashboard title cannot be empty"));
            };
            let title = title.to_string();

            let folder_uid = match (&request.folder_uid, request.folder_id) {
                (Some(uid), _) => Some(uid.clone()),
                (None, Some(id)) => Some(
                    s.folder_uid(org, &FolderSelector::Id(id))
                        .ok_or_else(|| not_found("folder"))?,
                ),
                (None, None) => None,
            };
            if let Some(uid) = &folder_uid {
                if !s.folders.contains_key(&(org, uid.clone())) {
                    return Err(not_found("folder"));
                }
            }

            let requested_uid = request
                .dashboard
                .get("uid")
                .and_then(Value::as_str)
                .filter(|u| !u.is_empty())
                .map(Uid::parse)
                .transpose()
                .map_err(|e| GatewayError::status(400, e.to_string()))?;

            let existing = requested_uid
                .as_ref()
                .and_then(|uid| s.dashboards.get(&(org, uid.clone())).cloned());

            if s.dashboards.iter().any(|((o, uid), d)| {
                *o == org
                    && Some(uid) != requested_uid.as_ref()
                    && d.folder_uid == folder_uid
                    && d.model.get("title").and_then(Value::as_str) == Some(title.as_str())
            }) && !request.overwrite
            {
                return Err(GatewayError::status(412, "a dashboard with the same name in the folder already exists"));
            }

            let (id, uid, version) = match existing {
                Some(current) => {
                    let sent = request.dashboard.get("version").and_then(Value::as_i64);
                    if !request.overwrite && sent != Some(current.version) {
                        return Err(GatewayError::status(412, "the dashboard has been changed by someone else"));
                    }
                    let uid = requested_uid.clone().ok_or_else(|| not_found("dashboard"))?;
                    (current.id, uid, current.version + 1)
                }
                None => {
                    let id = s.next_id();
                    let uid = match requested_uid {
                        Some(uid) => uid,
                        None => generated_uid("d", id)?,
                    };
                    (DashboardId::new(id), uid, 1)
                }
            };

            let mut model = request.dashboard.clone();
            if let Some(obj) = model.as_object_mut() {
                obj.insert("id".into(), Value::from(id.value()));
                obj.insert("uid".into(), Value::from(uid.as_str()));
                obj.insert("version".into(), Value::from(version));
            }
            s.dashboards.insert(
                (org, uid.clone()),
                StoredDashboard {
                    id,
                    model,
                    folder_uid,
                    version,
                },
            );

            Ok(SavedDashboard {
                id,
                url: format!("/d/{uid}"),
                uid,
                version,
            })
        })
    }

    async fn delete_dashboard(&self, org: Option<OrgId>, uid: &Uid) -> GatewayResult<()> {
        self.op("delete_dashboard", |s| {
            let org = s.scope(org)?;
            s.dashboards
                .remove(&(org, uid.clone()))
                .map(|_| ())
                .ok_or_else(|| not_found("dashboard"))
        })
    }
}
