//! # Scanport Common Library
//!
//! Shared code for the Scanport ingest services including:
//! - Blob store abstraction over local directories and a remote object store
//! - Database bootstrap for the document collections
//! - Configuration file discovery
//! - Time helpers

pub mod blob;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod time;

pub use blob::{BlobStore, StoreError, StoreErrorCode};
pub use error::{Error, Result};
