//! Reconciliation primitives.
//!
//! This library provides the pieces every resource kind uses to converge a
//! remote system toward a declared desired state:
//!
//! - **Value comparison** ([`value`]): structural equality over
//!   semi-structured payloads with numeric coercion.
//! - **Identity resolution** ([`resolve`]): finding the remote counterpart of
//!   a desired resource.
//! - **Membership deltas** ([`delta`]): minimal add/update/remove changes for
//!   keyed relations, with identity lookup and conflict tolerance.
//! - **The driver** ([`reconcile`], [`finalize`]): the observe, create,
//!   update and delete state machine over an [`ExternalClient`].
//!
//! # Invariants
//!
//! - The driver is level-triggered: every pass recomputes state from a fresh
//!   observation, nothing is remembered between passes except the status record
//! - A status record's identity is only cleared by a successful delete
//! - No operation retries internally; failures go back to the scheduler

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

pub mod delta;
pub mod error;
pub mod paginate;
pub mod resolve;
pub mod value;

pub use error::{BoxError, GatewayError, GatewayResultExt, ReconcileError, ReconcileResult};
pub use value::{CompareError, Drift};

/// Result of observing one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Whether a remote counterpart was found.
    pub exists: bool,

    /// Whether every compared field matched.
    pub up_to_date: bool,

    /// Names of the fields found out of date.
    pub drifted: Vec<&'static str>,
}

impl Observation {
    pub fn absent() -> Self {
        Self {
            exists: false,
            up_to_date: false,
            drifted: Vec::new(),
        }
    }

    pub fn present(drift: Drift) -> Self {
        Self {
            exists: true,
            up_to_date: drift.is_up_to_date(),
            drifted: drift.into_fields(),
        }
    }
}

/// Operations one resource kind implements against its remote gateway.
///
/// Implementations receive their gateways at construction time.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    /// Desired state, with defaults already applied.
    type Spec: Send + Sync;

    /// Status record owned by the pass.
    type Status: Send + Sync;

    /// Short kind name for logs.
    fn kind(&self) -> &'static str;

    /// Resolves the remote counterpart and compares it with `spec`.
    ///
    /// Writes the normalized observed state into `status` whenever the
    /// resource exists, regardless of the verdict.
    async fn observe(
        &self,
        spec: &Self::Spec,
        status: &mut Self::Status,
    ) -> ReconcileResult<Observation>;

    /// Creates the resource and records its identity in `status`.
    async fn create(&self, spec: &Self::Spec, status: &mut Self::Status) -> ReconcileResult<()>;

    /// Re-fetches the resource and writes the desired state if it drifted.
    async fn update(&self, spec: &Self::Spec, status: &mut Self::Status) -> ReconcileResult<()>;

    /// Deletes the resource identified by `status`.
    ///
    /// Only the status is needed, so resources whose desired state is gone
    /// can still be removed. Returns `Ok(false)` without calling the gateway
    /// when no identity is recorded. A successful delete clears the identity.
    async fn delete(&self, status: &mut Self::Status) -> ReconcileResult<bool>;
}

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated { drifted: Vec<&'static str> },
    UpToDate,
    Deleted,
    AlreadyAbsent,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated { .. } => "updated",
            Self::UpToDate => "up_to_date",
            Self::Deleted => "deleted",
            Self::AlreadyAbsent => "already_absent",
        }
    }
}

/// Runs one pass toward `spec`: observe, then create or update as needed.
pub async fn reconcile<C>(
    client: &C,
    spec: &C::Spec,
    status: &mut C::Status,
) -> ReconcileResult<Outcome>
where
    C: ExternalClient + ?Sized,
{
    let observation = client.observe(spec, status).await?;
    debug!(
        kind = client.kind(),
        exists = observation.exists,
        up_to_date = observation.up_to_date,
        "observed"
    );

    if !observation.exists {
        client.create(spec, status).await?;
        info!(kind = client.kind(), "created");
        return Ok(Outcome::Created);
    }

    if observation.up_to_date {
        return Ok(Outcome::UpToDate);
    }

    client.update(spec, status).await?;
    info!(kind = client.kind(), drifted = ?observation.drifted, "updated");
    Ok(Outcome::Updated {
        drifted: observation.drifted,
    })
}

/// Deletes the resource if the status record names one.
pub async fn finalize<C>(client: &C, status: &mut C::Status) -> ReconcileResult<Outcome>
where
    C: ExternalClient + ?Sized,
{
    if client.delete(status).await? {
        info!(kind = client.kind(), "deleted");
        Ok(Outcome::Deleted)
    } else {
        debug!(kind = client.kind(), "nothing recorded, delete already satisfied");
        Ok(Outcome::AlreadyAbsent)
    }
}

/// Default reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
