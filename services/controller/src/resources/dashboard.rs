//! Dashboards.
//!
//! Grafana rewrites dashboard models on save (it injects IDs, versions and
//! schema migrations), so a fresh model is never compared with the declared
//! one. Drift is the declared config against the config last written by this
//! controller, plus the remote version against the version that write
//! produced.

use std::sync::Arc;

use async_trait::async_trait;
use grafops_api::models::{Dashboard, SaveDashboard, SavedDashboard, SearchKind, SearchQuery};
use grafops_api::{GatewayError, Grafana};
use grafops_id::{DashboardId, FolderId, FolderSelector, OrgId, ScopedUid, Uid};
use grafops_reconcile::resolve::{resolve, RemoteLookup};
use grafops_reconcile::{Drift, ExternalClient, GatewayResultExt, Observation, ReconcileError, ReconcileResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::ignore_not_found;
use crate::manifest::DashboardManifest;

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSpec {
    pub org: OrgId,
    pub config: Map<String, Value>,
    pub title: String,
    /// UID declared in the config, if any.
    pub uid: Option<Uid>,
    pub folder: Option<FolderSelector>,
    pub message: String,
    pub overwrite: bool,
}

impl DashboardSpec {
    pub fn resolve(manifest: &DashboardManifest, org: OrgId, folder: Option<FolderSelector>) -> ReconcileResult<Self> {
        let config = match serde_json::from_str::<Value>(&manifest.config_json) {
            Ok(Value::Object(config)) => config,
            Ok(_) => {
                return Err(ReconcileError::InvalidSpec(format!(
                    "config_json of dashboard '{}' must be a JSON object",
                    manifest.name
                )))
            }
            Err(e) => {
                return Err(ReconcileError::InvalidSpec(format!(
                    "config_json of dashboard '{}': {e}",
                    manifest.name
                )))
            }
        };

        let title = config
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ReconcileError::InvalidSpec(format!("dashboard '{}' has no title", manifest.name)))?
            .to_string();

        let uid = match config.get("uid") {
            Some(Value::String(uid)) if !uid.trim().is_empty() => {
                Some(Uid::parse(uid).map_err(|e| ReconcileError::InvalidSpec(format!("dashboard uid: {e}")))?)
            }
            _ => None,
        };

        Ok(Self {
            org,
            config,
            title,
            uid,
            folder,
            message: manifest.message.clone().unwrap_or_default(),
            overwrite: manifest.overwrite.unwrap_or(false),
        })
    }

    fn drift(&self, actual: &Dashboard, status: &DashboardStatus) -> ReconcileResult<Drift> {
        let mut drift = Drift::new();
        drift.check("folder", self.in_declared_folder(actual));

        match &status.config_json {
            Some(written) => {
                drift.value("config", &Value::Object(self.config.clone()), written)?;
            }
            None => {
                drift.check("config", false);
            }
        }

        drift.check("version", status.managed_version == Some(actual.meta.version));
        Ok(drift)
    }

    fn in_declared_folder(&self, actual: &Dashboard) -> bool {
        let meta = &actual.meta;
        match &self.folder {
            Some(FolderSelector::Id(id)) => meta.folder_id == Some(*id),
            Some(FolderSelector::Uid(uid)) => meta.folder_uid.as_deref() == Some(uid.as_str()),
            // the General folder reports ID 0 and an empty UID
            None => {
                meta.folder_uid.as_deref().unwrap_or("").is_empty()
                    && meta.folder_id.is_none_or(|id| id.value() == 0)
            }
        }
    }

    fn save(&self, identity: Option<(&Dashboard, &Uid)>) -> SaveDashboard {
        let mut model = self.config.clone();
        model.remove("id");
        if let Some((actual, uid)) = identity {
            if let Some(id) = actual.id() {
                model.insert("id".into(), Value::from(id.value()));
            }
            model.insert("uid".into(), Value::from(uid.as_str()));
            model.insert("version".into(), Value::from(actual.meta.version));
        }

        SaveDashboard {
            dashboard: Value::Object(model),
            folder_id: None,
            folder_uid: None,
            message: self.message.clone(),
            overwrite: self.overwrite,
        }
        .in_folder(self.folder.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardStatus {
    /// `org:uid` of the dashboard.
    pub id: Option<ScopedUid>,
    pub org_id: Option<OrgId>,
    pub uid: Option<Uid>,
    pub dashboard_id: Option<DashboardId>,
    pub folder_id: Option<FolderId>,
    pub folder_uid: Option<String>,
    pub url: String,
    pub version: i64,
    /// Version produced by the last save from this controller.
    pub managed_version: Option<i64>,
    /// Config as last written by this controller.
    pub config_json: Option<Value>,
}

impl DashboardStatus {
    fn record_observed(&mut self, org: OrgId, uid: &Uid, actual: &Dashboard) {
        self.id = Some(ScopedUid::new(org, uid.clone()));
        self.org_id = Some(org);
        self.uid = Some(uid.clone());
        if let Some(id) = actual.id() {
            self.dashboard_id = Some(id);
        }
        self.folder_id = actual.meta.folder_id;
        self.folder_uid = actual.meta.folder_uid.clone().filter(|f| !f.is_empty());
        self.url = actual.meta.url.clone();
        self.version = actual.meta.version;
    }

    fn record_saved(&mut self, spec: &DashboardSpec, saved: &SavedDashboard) {
        self.id = Some(ScopedUid::new(spec.org, saved.uid.clone()));
        self.org_id = Some(spec.org);
        self.uid = Some(saved.uid.clone());
        self.dashboard_id = Some(saved.id);
        match &spec.folder {
            Some(FolderSelector::Id(id)) => {
                self.folder_id = Some(*id);
                self.folder_uid = None;
            }
            Some(FolderSelector::Uid(uid)) => {
                self.folder_id = None;
                self.folder_uid = Some(uid.to_string());
            }
            None => {
                self.folder_id = None;
                self.folder_uid = None;
            }
        }
        self.url = saved.url.clone();
        self.version = saved.version;
        self.managed_version = Some(saved.version);
        self.config_json = Some(Value::Object(spec.config.clone()));
    }

    fn uid_in(&self, org: OrgId) -> Option<&Uid> {
        match (&self.uid, &self.id) {
            (Some(uid), _) if self.org_id == Some(org) => Some(uid),
            (_, Some(id)) if id.org == org => Some(&id.uid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct DashboardQuery {
    title: String,
    folder: Option<FolderSelector>,
}

pub struct Dashboards<G: ?Sized> {
    grafana: Arc<G>,
}

impl<G: Grafana + ?Sized> Dashboards<G> {
    pub fn new(grafana: Arc<G>) -> Self {
        Self { grafana }
    }

    async fn find(&self, spec: &DashboardSpec, status: &DashboardStatus) -> ReconcileResult<Option<(Uid, Dashboard)>> {
        let lookup = DashboardLookup {
            grafana: &*self.grafana,
            org: spec.org,
        };
        let identity = spec.uid.as_ref().or_else(|| status.uid_in(spec.org));
        let query = DashboardQuery {
            title: spec.title.clone(),
            folder: spec.folder.clone(),
        };
        resolve(&lookup, identity, &query).await
    }

    async fn save(
        &self,
        spec: &DashboardSpec,
        request: &SaveDashboard,
        status: &mut DashboardStatus,
    ) -> ReconcileResult<()> {
        let saved = self
            .grafana
            .save_dashboard(Some(spec.org), request)
            .await
            .during(format!("save dashboard '{}'", spec.title))?;
        status.record_saved(spec, &saved);
        Ok(())
    }
}

#[async_trait]
impl<G: Grafana + ?Sized> ExternalClient for Dashboards<G> {
    type Spec = DashboardSpec;
    type Status = DashboardStatus;

    fn kind(&self) -> &'static str {
        "dashboard"
    }

    async fn observe(&self, spec: &DashboardSpec, status: &mut DashboardStatus) -> ReconcileResult<Observation> {
        let Some((uid, actual)) = self.find(spec, status).await? else {
            return Ok(Observation::absent());
        };
        status.record_observed(spec.org, &uid, &actual);
        Ok(Observation::present(spec.drift(&actual, status)?))
    }

    async fn create(&self, spec: &DashboardSpec, status: &mut DashboardStatus) -> ReconcileResult<()> {
        self.save(spec, &spec.save(None), status).await
    }

    async fn update(&self, spec: &DashboardSpec, status: &mut DashboardStatus) -> ReconcileResult<()> {
        let (uid, actual) = self
            .find(spec, status)
            .await?
            .ok_or_else(|| ReconcileError::Vanished(format!("dashboard '{}'", spec.title)))?;
        status.record_observed(spec.org, &uid, &actual);

        if spec.drift(&actual, status)?.is_up_to_date() {
            debug!(uid = %uid, "dashboard converged since observe");
            return Ok(());
        }

        self.save(spec, &spec.save(Some((&actual, &uid))), status).await
    }

    async fn delete(&self, status: &mut DashboardStatus) -> ReconcileResult<bool> {
        let Some(id) = status.id.clone() else {
            return Ok(false);
        };

        ignore_not_found(
            self.grafana.delete_dashboard(Some(id.org), &id.uid).await,
            format!("delete dashboard {id}"),
        )?;
        status.id = None;
        status.uid = None;
        status.dashboard_id = None;
        Ok(true)
    }
}

struct DashboardLookup<'a, G: ?Sized> {
    grafana: &'a G,
    org: OrgId,
}

#[async_trait]
impl<G: Grafana + ?Sized> RemoteLookup for DashboardLookup<'_, G> {
    type Identity = Uid;
    type Query = DashboardQuery;
    type Resource = (Uid, Dashboard);

    async fn fetch_by_identity(&self, uid: &Uid) -> Result<(Uid, Dashboard), GatewayError> {
        let dashboard = self.grafana.get_dashboard(Some(self.org), uid).await?;
        Ok((uid.clone(), dashboard))
    }

    async fn search_by_name(&self, query: &DashboardQuery) -> Result<Vec<(Uid, Dashboard)>, GatewayError> {
        let search = SearchQuery {
            kind: SearchKind::Dashboard,
            query: query.title.clone(),
            folder: query.folder.clone(),
        };
        let hits = self.grafana.search(Some(self.org), &search).await?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(Vec::new());
        };
        Ok(vec![self.fetch_by_identity(&hit.uid).await?])
    }
}
