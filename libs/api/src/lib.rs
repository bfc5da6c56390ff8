//! Grafana gateway layer.
//!
//! [`gateway`] holds the traits resource kinds are written against,
//! [`GrafanaClient`] implements them over HTTP, and [`models`] holds the wire
//! types shared by both. Tests substitute an in-memory implementation of the
//! same traits.

pub mod client;
pub mod gateway;
pub mod models;
pub mod password;

pub use client::{ClientConfig, GrafanaClient, ORG_ID_HEADER};
pub use gateway::{
    DashboardGateway, DataSourceGateway, DirectoryGateway, FolderGateway, GatewayResult, Grafana,
    OrgGateway, SearchGateway, SessionGateway,
};
pub use grafops_reconcile::GatewayError;
pub use password::generate_password;
