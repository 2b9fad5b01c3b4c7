//! Document collections
//!
//! Every collection row stores the document as JSON next to its key
//! columns. All writes are upserts wrapped in `retry_on_lock`, so publishing
//! the same documents twice leaves the database unchanged.

pub mod auto_share;
pub mod images;
pub mod jobs;
pub mod ownership;
pub mod scans;

pub use auto_share::{AutoShareLookup, DbAutoShareLookup};

use scanport_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn to_doc<T: Serialize>(what: &str, value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

pub(crate) fn from_doc<T: DeserializeOwned>(what: &str, doc: &str) -> Result<T> {
    serde_json::from_str(doc)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", what, e)))
}
