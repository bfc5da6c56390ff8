//! Organizations and their role assignments.
//!
//! Membership is a keyed relation from normalized email to [`OrgRole`],
//! reconciled with the membership delta. The configured admin user is left
//! out of the observed relation unless it is declared, since Grafana adds
//! the creating user to every new organization.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use grafops_api::models::{NewUser, Org, OrgRole, OrgUser};
use grafops_api::{generate_password, GatewayError, Grafana};
use grafops_id::{OrgId, UserId};
use grafops_reconcile::delta::{
    apply_changes, delta, index_by, materialize, normalize_email, Directory, Member, Principal, Relation,
    RelationWriter,
};
use grafops_reconcile::paginate::{collect_pages, DEFAULT_PAGE_SIZE};
use grafops_reconcile::resolve::{resolve, RemoteLookup};
use grafops_reconcile::{Drift, ExternalClient, GatewayResultExt, Observation, ReconcileError, ReconcileResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ignore_not_found;
use crate::manifest::OrganizationManifest;

pub const DEFAULT_ADMIN_USER: &str = "admin";

pub type Members = Relation<OrgRole, UserId>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationSpec {
    pub name: String,
    pub admin_user: String,
    /// Create missing users instead of failing the pass.
    pub create_users: bool,
    pub members: Members,
}

impl OrganizationSpec {
    pub fn from_manifest(manifest: &OrganizationManifest) -> ReconcileResult<Self> {
        let name = manifest.grafana_name.as_deref().unwrap_or(&manifest.name).trim().to_string();
        if name.is_empty() {
            return Err(ReconcileError::InvalidSpec("organization name cannot be empty".into()));
        }

        let mut members = Members::new();
        let lists = [
            (OrgRole::Admin, &manifest.admins),
            (OrgRole::Editor, &manifest.editors),
            (OrgRole::Viewer, &manifest.viewers),
            (OrgRole::None, &manifest.users_without_access),
        ];
        for (role, users) in lists {
            for user in users {
                let key = normalize_email(user);
                if key.is_empty() {
                    return Err(ReconcileError::InvalidSpec(format!("empty user in the {role} list")));
                }
                if let Some(previous) = members.insert(key.clone(), Member::new(key.clone(), role)) {
                    return Err(ReconcileError::InvalidSpec(format!(
                        "user '{key}' is listed as {} and as {role}",
                        previous.attribute
                    )));
                }
            }
        }

        Ok(Self {
            name,
            admin_user: manifest
                .admin_user
                .clone()
                .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string()),
            create_users: manifest.create_users.unwrap_or(true),
            members,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationStatus {
    pub org_id: Option<OrgId>,
    pub name: Option<String>,
    pub members: BTreeMap<String, OrgRole>,
}

impl OrganizationStatus {
    fn record(&mut self, org: &Org, members: &Members) {
        self.org_id = Some(org.id);
        self.name = Some(org.name.clone());
        self.members = roles(members);
    }
}

fn roles(members: &Members) -> BTreeMap<String, OrgRole> {
    members.iter().map(|(k, m)| (k.clone(), m.attribute)).collect()
}

/// Email, or login for users without one.
fn member_key(email: &str, login: &str) -> String {
    if email.trim().is_empty() {
        normalize_email(login)
    } else {
        normalize_email(email)
    }
}

pub struct Organizations<G: ?Sized> {
    grafana: Arc<G>,
    page_size: u32,
}

impl<G: Grafana + ?Sized> Organizations<G> {
    pub fn new(grafana: Arc<G>) -> Self {
        Self {
            grafana,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Page size for user and organization listings.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    async fn find(&self, spec: &OrganizationSpec, status: &OrganizationStatus) -> ReconcileResult<Option<Org>> {
        resolve(&OrgLookup(&*self.grafana), status.org_id.as_ref(), &spec.name).await
    }

    async fn observed_members(&self, org: OrgId, spec: &OrganizationSpec) -> ReconcileResult<Members> {
        let users = self
            .grafana
            .list_org_users(org)
            .await
            .during(format!("list members of organization {org}"))?;

        let admin = normalize_email(&spec.admin_user);
        let members = users
            .into_iter()
            .filter(|user| !is_implicit_admin(user, &admin, &spec.members))
            .map(|user| Member::new(member_key(&user.email, &user.login), user.role).with_identity(user.user_id));

        Ok(index_by(members, normalize_email))
    }

    async fn converge(&self, org: OrgId, spec: &OrganizationSpec, actual: &Members) -> ReconcileResult<()> {
        let changes = delta(actual, &spec.members);
        if changes.is_empty() {
            return Ok(());
        }
        debug!(org_id = %org, changes = changes.len(), "membership drift");

        let writer = OrgMembers {
            grafana: &*self.grafana,
            org,
            page_size: self.page_size,
        };
        let changes = materialize(&writer, changes, spec.create_users, normalize_email).await?;
        apply_changes(&writer, &changes).await
    }

    /// Moves the session out of `org`. Grafana refuses to delete the
    /// organization the session is using.
    async fn leave(&self, org: OrgId) -> ReconcileResult<()> {
        let session = self
            .grafana
            .signed_in_user()
            .await
            .during("read signed-in user")?;
        if session.org_id != org {
            return Ok(());
        }

        let orgs = collect_pages(self.page_size, |page, per_page| self.grafana.list_orgs_page(page, per_page))
            .await
            .during("list organizations")?;
        let fallback = orgs
            .iter()
            .map(|o| o.id)
            .filter(|id| *id != org)
            .min()
            .ok_or_else(|| {
                ReconcileError::InvariantViolation(format!(
                    "organization {org} is the session's only organization and cannot be left"
                ))
            })?;

        info!(from = %org, to = %fallback, "switching session organization before delete");
        self.grafana
            .switch_org(fallback)
            .await
            .during(format!("switch session to organization {fallback}"))
    }
}

fn is_implicit_admin(user: &OrgUser, admin: &str, declared: &Members) -> bool {
    let is_admin = normalize_email(&user.login) == admin || normalize_email(&user.email) == admin;
    is_admin && !declared.contains_key(&member_key(&user.email, &user.login))
}

#[async_trait]
impl<G: Grafana + ?Sized> ExternalClient for Organizations<G> {
    type Spec = OrganizationSpec;
    type Status = OrganizationStatus;

    fn kind(&self) -> &'static str {
        "organization"
    }

    async fn observe(&self, spec: &OrganizationSpec, status: &mut OrganizationStatus) -> ReconcileResult<Observation> {
        let Some(org) = self.find(spec, status).await? else {
            return Ok(Observation::absent());
        };
        let actual = self.observed_members(org.id, spec).await?;
        status.record(&org, &actual);

        let mut drift = Drift::new();
        drift
            .field("name", spec.name.as_str(), org.name.as_str())
            .check("members", delta(&actual, &spec.members).is_empty());
        Ok(Observation::present(drift))
    }

    async fn create(&self, spec: &OrganizationSpec, status: &mut OrganizationStatus) -> ReconcileResult<()> {
        let org_id = self
            .grafana
            .create_org(&spec.name)
            .await
            .during(format!("create organization '{}'", spec.name))?;
        status.org_id = Some(org_id);
        status.name = Some(spec.name.clone());

        let actual = self.observed_members(org_id, spec).await?;
        self.converge(org_id, spec, &actual).await?;
        status.members = roles(&spec.members);
        Ok(())
    }

    async fn update(&self, spec: &OrganizationSpec, status: &mut OrganizationStatus) -> ReconcileResult<()> {
        let org = self
            .find(spec, status)
            .await?
            .ok_or_else(|| ReconcileError::Vanished(format!("organization '{}'", spec.name)))?;
        if org.name != spec.name {
            return Err(ReconcileError::InvariantViolation(format!(
                "organization {} is named '{}' but '{}' is declared; organization names cannot change",
                org.id, org.name, spec.name
            )));
        }

        let actual = self.observed_members(org.id, spec).await?;
        status.record(&org, &actual);
        self.converge(org.id, spec, &actual).await?;
        status.members = roles(&spec.members);
        Ok(())
    }

    async fn delete(&self, status: &mut OrganizationStatus) -> ReconcileResult<bool> {
        let Some(org) = status.org_id else {
            return Ok(false);
        };

        self.leave(org).await?;
        ignore_not_found(self.grafana.delete_org(org).await, format!("delete organization {org}"))?;

        status.org_id = None;
        status.members.clear();
        Ok(true)
    }
}

struct OrgLookup<'a, G: ?Sized>(&'a G);

#[async_trait]
impl<G: Grafana + ?Sized> RemoteLookup for OrgLookup<'_, G> {
    type Identity = OrgId;
    type Query = String;
    type Resource = Org;

    async fn fetch_by_identity(&self, id: &OrgId) -> Result<Org, GatewayError> {
        self.0.get_org(*id).await
    }

    async fn search_by_name(&self, name: &String) -> Result<Vec<Org>, GatewayError> {
        match self.0.get_org_by_name(name).await {
            Ok(org) => Ok(vec![org]),
            Err(e) if e.is_absence_equivalent() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Membership of one organization, backed by the global user directory.
struct OrgMembers<'a, G: ?Sized> {
    grafana: &'a G,
    org: OrgId,
    page_size: u32,
}

#[async_trait]
impl<G: Grafana + ?Sized> Directory for OrgMembers<'_, G> {
    type Identity = UserId;

    fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn list_page(&self, page: u32, per_page: u32) -> Result<Vec<Principal<UserId>>, GatewayError> {
        let users = self.grafana.list_users_page(page, per_page).await?;
        Ok(users
            .into_iter()
            .map(|u| Principal {
                key: member_key(&u.email, &u.login),
                identity: u.id,
            })
            .collect())
    }

    async fn provision(&self, key: &str) -> Result<UserId, GatewayError> {
        let user = NewUser {
            name: key.to_string(),
            email: key.to_string(),
            login: key.to_string(),
            password: generate_password(),
        };
        self.grafana.create_user(&user).await
    }
}

#[async_trait]
impl<G: Grafana + ?Sized> RelationWriter<OrgRole, UserId> for OrgMembers<'_, G> {
    async fn add(&self, _user: &UserId, key: &str, role: &OrgRole) -> Result<(), GatewayError> {
        self.grafana.add_org_user(self.org, key, *role).await
    }

    async fn update(&self, user: &UserId, role: &OrgRole) -> Result<(), GatewayError> {
        self.grafana.update_org_user(self.org, *user, *role).await
    }

    async fn remove(&self, user: &UserId) -> Result<(), GatewayError> {
        self.grafana.remove_org_user(self.org, *user).await
    }
}
