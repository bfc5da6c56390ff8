//! grafops controller library.
//!
//! This crate primarily ships the `grafops` binary, but exposes its library
//! surface so passes can be driven against a fake Grafana in integration
//! tests.

pub mod config;
pub mod manifest;
pub mod references;
pub mod resources;
pub mod secrets;
pub mod state;
pub mod worker;
