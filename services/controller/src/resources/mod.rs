//! Managed resource kinds.
//!
//! Each kind pairs a resolved desired spec (defaults applied, references and
//! secrets resolved) with a serializable status record, and implements
//! [`grafops_reconcile::ExternalClient`] against the gateway traits.

use grafops_id::OrgId;
use grafops_reconcile::{GatewayError, GatewayResultExt, ReconcileResult};
use tracing::debug;

pub mod dashboard;
pub mod datasource;
pub mod folder;
pub mod organization;

pub use dashboard::{DashboardSpec, DashboardStatus, Dashboards};
pub use datasource::{DataSourceSpec, DataSourceStatus, DataSources};
pub use folder::{FolderSpec, FolderStatus, Folders};
pub use organization::{OrganizationSpec, OrganizationStatus, Organizations};

/// Grafana's built-in organization, used when an instance names none.
pub const MAIN_ORG: OrgId = OrgId::new(1);

/// A delete that finds nothing to delete has still converged.
fn ignore_not_found(result: Result<(), GatewayError>, context: impl Into<String>) -> ReconcileResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "already deleted");
            Ok(())
        }
        other => other.during(context),
    }
}
