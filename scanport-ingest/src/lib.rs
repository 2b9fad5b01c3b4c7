//! scanport-ingest library interface
//!
//! Turns raw instrument bundles into published scan datasets. The binary is
//! a thin wrapper around [`orchestrator::ingest`]; integration tests drive the
//! same entry point against local-directory containers.

pub mod archive;
pub mod classify;
pub mod config;
pub mod converter;
pub mod db;
pub mod diffraction;
pub mod error;
pub mod images;
pub mod job_log;
pub mod models;
pub mod orchestrator;
pub mod overlay;
pub mod publish;
pub mod rate_limit;
pub mod sdf;
pub mod trigger;
pub mod utils;
pub mod working_tree;

pub use crate::config::{ConfigOverrides, IngestConfig};
pub use crate::error::{IngestError, Result};
pub use crate::orchestrator::{ingest, IngestContext};
