//! Error taxonomy shared by every resource kind.

use thiserror::Error;

use crate::value::CompareError;

/// Boxed error used for transport failures so this crate stays independent
/// of any particular HTTP client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by a remote gateway call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote answered with a non-success status.
    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The call did not complete within the caller's deadline.
    #[error("request timed out")]
    Timeout,

    /// Connection level failure.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status if the remote produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status_code() == Some(403)
    }

    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Not found and forbidden both mean "absent from this vantage point"
    /// when resolving identity.
    pub fn is_absence_equivalent(&self) -> bool {
        self.is_not_found() || self.is_forbidden()
    }
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A gateway call failed; surfaced verbatim with the operation it belonged to.
    #[error("{context}: {source}")]
    Gateway {
        context: String,
        #[source]
        source: GatewayError,
    },

    /// Desired and actual values have incomparable shapes.
    #[error(transparent)]
    Shape(#[from] CompareError),

    /// A membership change references a principal that does not exist.
    #[error("principal '{key}' does not exist and auto-provisioning is disabled")]
    MissingPrincipal { key: String },

    /// An immutable field changed, or remote state contradicts itself.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The desired specification cannot be turned into a request.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// The resource disappeared between Observe and Update.
    #[error("{0} no longer exists")]
    Vanished(String),

    /// A cross reference to another resource could not be resolved.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A secret could not be read or decoded.
    #[error("secret error: {0}")]
    Secret(String),
}

impl ReconcileError {
    pub fn gateway(context: impl Into<String>, source: GatewayError) -> Self {
        Self::Gateway {
            context: context.into(),
            source,
        }
    }

    /// Returns the underlying gateway error, if any.
    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Self::Gateway { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Attaches an operation context to gateway results.
pub trait GatewayResultExt<T> {
    fn during(self, context: impl Into<String>) -> ReconcileResult<T>;
}

impl<T> GatewayResultExt<T> for Result<T, GatewayError> {
    fn during(self, context: impl Into<String>) -> ReconcileResult<T> {
        self.map_err(|e| ReconcileError::gateway(context, e))
    }
}
