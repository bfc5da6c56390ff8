//! Folders.

use std::sync::Arc;

use async_trait::async_trait;
use grafops_api::models::{Folder, FolderUpdate, NewFolder, SearchKind, SearchQuery};
use grafops_api::{GatewayError, Grafana};
use grafops_id::{FolderId, FolderSelector, OrgId, ScopedUid, Uid};
use grafops_reconcile::resolve::{resolve, RemoteLookup};
use grafops_reconcile::{Drift, ExternalClient, GatewayResultExt, Observation, ReconcileError, ReconcileResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ignore_not_found;
use crate::manifest::FolderManifest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSpec {
    pub org: OrgId,
    pub title: String,
    pub uid: Option<Uid>,
    pub parent_uid: Option<Uid>,
}

impl FolderSpec {
    pub fn resolve(manifest: &FolderManifest, org: OrgId) -> ReconcileResult<Self> {
        let title = manifest.title.as_deref().unwrap_or(&manifest.name).trim().to_string();
        if title.is_empty() {
            return Err(ReconcileError::InvalidSpec(format!("folder '{}' has an empty title", manifest.name)));
        }

        Ok(Self {
            org,
            title,
            uid: optional_uid(manifest.uid.as_deref(), "uid")?,
            parent_uid: optional_uid(manifest.parent_folder_uid.as_deref(), "parent_folder_uid")?,
        })
    }

    fn drift(&self, actual: &Folder) -> Drift {
        let mut drift = Drift::new();
        drift.field("title", self.title.as_str(), actual.title.as_str());
        drift
    }
}

fn optional_uid(raw: Option<&str>, field: &str) -> ReconcileResult<Option<Uid>> {
    match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => Uid::parse(raw)
            .map(Some)
            .map_err(|e| ReconcileError::InvalidSpec(format!("{field}: {e}"))),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderStatus {
    /// `org:uid` of the folder.
    pub id: Option<ScopedUid>,
    pub org_id: Option<OrgId>,
    pub uid: Option<Uid>,
    pub folder_id: Option<FolderId>,
    pub title: Option<String>,
    pub parent_uid: Option<String>,
    pub url: String,
    pub version: i64,
}

impl FolderStatus {
    fn record(&mut self, org: OrgId, folder: &Folder) {
        self.id = Some(ScopedUid::new(org, folder.uid.clone()));
        self.org_id = Some(org);
        self.uid = Some(folder.uid.clone());
        self.folder_id = Some(folder.id);
        self.title = Some(folder.title.clone());
        self.parent_uid = Some(folder.parent_uid.clone()).filter(|p| !p.is_empty());
        self.url = folder.url.clone();
        self.version = folder.version;
    }

    /// The recorded UID, if it belongs to `org`.
    pub fn uid_in(&self, org: OrgId) -> Option<&Uid> {
        match (&self.uid, &self.id) {
            (Some(uid), _) if self.org_id == Some(org) => Some(uid),
            (_, Some(id)) if id.org == org => Some(&id.uid),
            _ => None,
        }
    }

    /// Selector other instances use to place dashboards in this folder.
    pub fn selector(&self) -> Option<(OrgId, FolderSelector)> {
        let id = self.id.as_ref()?;
        Some((id.org, FolderSelector::Uid(id.uid.clone())))
    }
}

#[derive(Debug, Clone)]
struct FolderQuery {
    title: String,
    parent: Option<Uid>,
}

pub struct Folders<G: ?Sized> {
    grafana: Arc<G>,
}

impl<G: Grafana + ?Sized> Folders<G> {
    pub fn new(grafana: Arc<G>) -> Self {
        Self { grafana }
    }

    /// Declared UID first, then the recorded one, then search by title.
    async fn find(&self, spec: &FolderSpec, status: &FolderStatus) -> ReconcileResult<Option<Folder>> {
        let lookup = FolderLookup {
            grafana: &*self.grafana,
            org: spec.org,
        };
        let identity = spec.uid.as_ref().or_else(|| status.uid_in(spec.org));
        let query = FolderQuery {
            title: spec.title.clone(),
            parent: spec.parent_uid.clone(),
        };
        resolve(&lookup, identity, &query).await
    }
}

#[async_trait]
impl<G: Grafana + ?Sized> ExternalClient for Folders<G> {
    type Spec = FolderSpec;
    type Status = FolderStatus;

    fn kind(&self) -> &'static str {
        "folder"
    }

    async fn observe(&self, spec: &FolderSpec, status: &mut FolderStatus) -> ReconcileResult<Observation> {
        let Some(folder) = self.find(spec, status).await? else {
            return Ok(Observation::absent());
        };
        status.record(spec.org, &folder);
        Ok(Observation::present(spec.drift(&folder)))
    }

    async fn create(&self, spec: &FolderSpec, status: &mut FolderStatus) -> ReconcileResult<()> {
        let request = NewFolder {
            uid: spec.uid.as_ref().map(Uid::to_string),
            title: spec.title.clone(),
            parent_uid: spec.parent_uid.as_ref().map(Uid::to_string).unwrap_or_default(),
        };
        let created = self
            .grafana
            .create_folder(Some(spec.org), &request)
            .await
            .during(format!("create folder '{}'", spec.title))?;
        status.record(spec.org, &created);
        Ok(())
    }

    async fn update(&self, spec: &FolderSpec, status: &mut FolderStatus) -> ReconcileResult<()> {
        let folder = self
            .find(spec, status)
            .await?
            .ok_or_else(|| ReconcileError::Vanished(format!("folder '{}'", spec.title)))?;
        status.record(spec.org, &folder);

        if spec.drift(&folder).is_up_to_date() {
            debug!(uid = %folder.uid, "folder converged since observe");
            return Ok(());
        }

        let update = FolderUpdate {
            title: spec.title.clone(),
            version: folder.version,
        };
        let updated = self
            .grafana
            .update_folder(Some(spec.org), &folder.uid, &update)
            .await
            .during(format!("update folder {}", folder.uid))?;
        status.record(spec.org, &updated);
        Ok(())
    }

    async fn delete(&self, status: &mut FolderStatus) -> ReconcileResult<bool> {
        let Some(id) = status.id.clone() else {
            return Ok(false);
        };

        ignore_not_found(
            self.grafana.delete_folder(Some(id.org), &id.uid).await,
            format!("delete folder {id}"),
        )?;
        status.id = None;
        status.uid = None;
        status.folder_id = None;
        Ok(true)
    }
}

struct FolderLookup<'a, G: ?Sized> {
    grafana: &'a G,
    org: OrgId,
}

#[async_trait]
impl<G: Grafana + ?Sized> RemoteLookup for FolderLookup<'_, G> {
    type Identity = Uid;
    type Query = FolderQuery;
    type Resource = Folder;

    async fn fetch_by_identity(&self, uid: &Uid) -> Result<Folder, GatewayError> {
        self.grafana.get_folder(Some(self.org), uid).await
    }

    async fn search_by_name(&self, query: &FolderQuery) -> Result<Vec<Folder>, GatewayError> {
        let search = SearchQuery {
            kind: SearchKind::Folder,
            query: query.title.clone(),
            folder: query.parent.clone().map(FolderSelector::Uid),
        };
        let hits = self.grafana.search(Some(self.org), &search).await?;

        // top-level search also returns nested folders with the same title
        let parent = query.parent.as_ref().map(Uid::as_str).unwrap_or("");
        let Some(hit) = hits
            .into_iter()
            .find(|h| h.folder_uid.as_deref().unwrap_or("") == parent)
        else {
            return Ok(Vec::new());
        };

        Ok(vec![self.grafana.get_folder(Some(self.org), &hit.uid).await?])
    }
}
