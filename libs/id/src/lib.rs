//! # grafops-id
//!
//! Typed identifiers for the resources grafops reconciles.
//!
//! ## Design Principles
//!
//! - Names are user-controlled labels; IDs and UIDs are assigned by Grafana
//! - Numeric IDs are typed so an organization ID can never be passed where a
//!   data source ID is expected
//! - Every identifier has a canonical string form with strict parsing
//!
//! ## Formats
//!
//! - Numeric IDs render as plain decimal integers (`42`)
//! - UIDs are opaque non-empty strings (`P8E80F9AEF21F6940`)
//! - Scoped UIDs combine an organization with a UID (`3:P8E80F9AEF21F6940`),
//!   the composite identity recorded for folders and dashboards
//! - Folder selectors accept either a numeric folder ID or a folder UID

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
