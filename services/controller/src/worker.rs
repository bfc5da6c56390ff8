//! Reconciliation driver.
//!
//! A pass re-reads the manifests and the status store, reconciles every
//! declared instance kind by kind in dependency order, deletes recorded
//! instances that are no longer declared, and writes the store back.
//! [`ControllerWorker`] repeats the pass on an interval until shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use grafops_api::Grafana;
use grafops_reconcile::{finalize, reconcile, ExternalClient, Outcome, ReconcileError, ReconcileResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::manifest::Manifest;
use crate::references::References;
use crate::resources::{
    DashboardSpec, Dashboards, DataSourceSpec, DataSources, FolderSpec, Folders, OrganizationSpec, Organizations,
};
use crate::secrets::SecretSource;
use crate::state::{Condition, Kind, StateFile};

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub created: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl PassStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated { .. } => self.updated += 1,
            Outcome::UpToDate => self.up_to_date += 1,
            Outcome::Deleted | Outcome::AlreadyAbsent => self.deleted += 1,
        }
    }

    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Drives every resource kind against one Grafana.
pub struct Controller<G: ?Sized> {
    organizations: Organizations<G>,
    folders: Folders<G>,
    datasources: DataSources<G>,
    dashboards: Dashboards<G>,
    secrets: Box<dyn SecretSource>,
    manifest_dir: PathBuf,
    state_file: PathBuf,
}

impl<G: Grafana + ?Sized> Controller<G> {
    pub fn new(
        grafana: Arc<G>,
        secrets: Box<dyn SecretSource>,
        manifest_dir: impl Into<PathBuf>,
        state_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            organizations: Organizations::new(grafana.clone()),
            folders: Folders::new(grafana.clone()),
            datasources: DataSources::new(grafana.clone()),
            dashboards: Dashboards::new(grafana),
            secrets,
            manifest_dir: manifest_dir.into(),
            state_file: state_file.into(),
        }
    }

    /// Runs one full pass.
    ///
    /// Failures of individual instances are recorded as their condition and
    /// counted; only an unreadable manifest directory or state file fails
    /// the pass as a whole. Nothing is deleted when the manifests cannot be
    /// read.
    pub async fn run_pass(&self) -> Result<PassStats> {
        let manifest = Manifest::load_dir(&self.manifest_dir)?;
        let mut state = StateFile::load(&self.state_file)?;
        let mut stats = PassStats::default();

        for kind in Kind::APPLY_ORDER {
            self.apply_kind(kind, &manifest, &mut state, &mut stats).await?;
        }

        for kind in Kind::APPLY_ORDER.into_iter().rev() {
            let declared = declared_names(&manifest, kind);
            for name in state.names(kind) {
                if declared.contains(&name.as_str()) {
                    continue;
                }
                match kind {
                    Kind::Organization => prune(&self.organizations, &mut state, kind, &name, &mut stats).await?,
                    Kind::Folder => prune(&self.folders, &mut state, kind, &name, &mut stats).await?,
                    Kind::DataSource => prune(&self.datasources, &mut state, kind, &name, &mut stats).await?,
                    Kind::Dashboard => prune(&self.dashboards, &mut state, kind, &name, &mut stats).await?,
                }
            }
        }

        state.save(&self.state_file)?;
        Ok(stats)
    }

    async fn apply_kind(
        &self,
        kind: Kind,
        manifest: &Manifest,
        state: &mut StateFile,
        stats: &mut PassStats,
    ) -> Result<()> {
        match kind {
            Kind::Organization => {
                for m in &manifest.organizations {
                    let spec = OrganizationSpec::from_manifest(m);
                    sync(&self.organizations, state, kind, &m.name, spec, stats).await?;
                }
            }
            Kind::Folder => {
                for m in &manifest.folders {
                    let spec = References::new(state).org(m.org()).and_then(|org| FolderSpec::resolve(m, org));
                    sync(&self.folders, state, kind, &m.name, spec, stats).await?;
                }
            }
            Kind::DataSource => {
                for m in &manifest.datasources {
                    let spec = References::new(state)
                        .org(m.org())
                        .and_then(|org| DataSourceSpec::resolve(m, org, self.secrets.as_ref()));
                    sync(&self.datasources, state, kind, &m.name, spec, stats).await?;
                }
            }
            Kind::Dashboard => {
                for m in &manifest.dashboards {
                    let refs = References::new(state);
                    let spec = refs.org(m.org()).and_then(|org| {
                        let folder = refs.folder(org, m.folder.as_ref(), m.folder_ref.as_deref())?;
                        DashboardSpec::resolve(m, org, folder)
                    });
                    sync(&self.dashboards, state, kind, &m.name, spec, stats).await?;
                }
            }
        }
        Ok(())
    }
}

fn declared_names(manifest: &Manifest, kind: Kind) -> Vec<&str> {
    match kind {
        Kind::Organization => manifest.organizations.iter().map(|m| m.name.as_str()).collect(),
        Kind::Folder => manifest.folders.iter().map(|m| m.name.as_str()).collect(),
        Kind::DataSource => manifest.datasources.iter().map(|m| m.name.as_str()).collect(),
        Kind::Dashboard => manifest.dashboards.iter().map(|m| m.name.as_str()).collect(),
    }
}

/// Reconciles one declared instance and records the result.
///
/// The status is written back on failure too, so an identity learned before
/// the failing step survives into the next pass.
#[instrument(skip_all, fields(kind = %kind, name = %name))]
async fn sync<C>(
    client: &C,
    state: &mut StateFile,
    kind: Kind,
    name: &str,
    spec: ReconcileResult<C::Spec>,
    stats: &mut PassStats,
) -> Result<()>
where
    C: ExternalClient + ?Sized,
    C::Status: Serialize + DeserializeOwned + Default,
{
    let spec = match spec {
        Ok(spec) => spec,
        Err(e) => {
            warn!(error = %e, "Cannot build desired state");
            state.set_condition(kind, name, Condition::Error(e.to_string()));
            stats.failed += 1;
            return Ok(());
        }
    };

    let Some(mut status) = load_status::<C::Status>(state, kind, name, stats) else {
        return Ok(());
    };

    match reconcile(client, &spec, &mut status).await {
        Ok(outcome) => {
            debug!(outcome = outcome.as_str(), "Reconciled");
            stats.record(&outcome);
            state.put(kind, name, &status, Condition::Synced, Some(outcome.as_str()))?;
        }
        Err(e) => {
            warn!(error = %e, "Reconciliation failed");
            stats.failed += 1;
            state.put(kind, name, &status, Condition::Error(e.to_string()), None)?;
        }
    }
    Ok(())
}

/// Deletes a recorded instance that is no longer declared and drops its
/// record once the delete succeeded.
#[instrument(skip_all, fields(kind = %kind, name = %name))]
async fn prune<C>(client: &C, state: &mut StateFile, kind: Kind, name: &str, stats: &mut PassStats) -> Result<()>
where
    C: ExternalClient + ?Sized,
    C::Status: Serialize + DeserializeOwned + Default,
{
    let Some(mut status) = load_status::<C::Status>(state, kind, name, stats) else {
        return Ok(());
    };

    match finalize(client, &mut status).await {
        Ok(outcome) => {
            info!(outcome = outcome.as_str(), "Removed undeclared instance");
            stats.record(&outcome);
            state.remove(kind, name);
        }
        Err(e) => {
            warn!(error = %e, "Delete failed");
            stats.failed += 1;
            state.put(kind, name, &status, Condition::Error(e.to_string()), None)?;
        }
    }
    Ok(())
}

/// Decodes a recorded status, marking the instance failed when the record
/// no longer matches the status shape. The record is left untouched then.
fn load_status<S>(state: &mut StateFile, kind: Kind, name: &str, stats: &mut PassStats) -> Option<S>
where
    S: DeserializeOwned + Default,
{
    match state.status(kind, name) {
        Ok(status) => Some(status),
        Err(e) => {
            let e = ReconcileError::InvalidSpec(format!("unreadable status record: {e}"));
            warn!(error = %e, "Skipping instance");
            state.set_condition(kind, name, Condition::Error(e.to_string()));
            stats.failed += 1;
            None
        }
    }
}

/// Worker that runs [`Controller::run_pass`] on an interval.
pub struct ControllerWorker<G: ?Sized> {
    controller: Controller<G>,
    interval: Duration,
}

impl<G: Grafana + ?Sized> ControllerWorker<G> {
    pub fn new(controller: Controller<G>, interval: Duration) -> Self {
        Self { controller, interval }
    }

    /// Run passes until shutdown is signaled. The first pass starts
    /// immediately.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting controller worker");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_reconciliation().await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Controller worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_reconciliation(&self) -> Result<()> {
        let stats = self.controller.run_pass().await?;

        if stats.changed() || stats.failed > 0 {
            info!(
                created = stats.created,
                updated = stats.updated,
                up_to_date = stats.up_to_date,
                deleted = stats.deleted,
                failed = stats.failed,
                "Reconciliation pass complete"
            );
        }

        Ok(())
    }
}
