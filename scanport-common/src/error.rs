//! Errors raised by the shared store, database and config layers
//!
//! Ingest code wraps these in its own error kinds; anything here is an
//! infrastructure failure rather than a problem with a scan bundle.

use thiserror::Error;

use crate::blob::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite query or pool failure on the document collections
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Local filesystem failure (data folder, working tree, local containers)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object container failure, keeping its store error code
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Unreadable TOML file or unusable setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored row or blob could not be decoded back into its record
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::StoreErrorCode;

    #[test]
    fn test_store_error_keeps_code() {
        let err: Error = StoreError::not_found("datasets", "Scans/1/dataset.bin").into();
        match &err {
            Error::Store(inner) => assert_eq!(inner.code, StoreErrorCode::NotFound),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.to_string(), "Store error: datasets/Scans/1/dataset.bin does not exist (not found)");
    }

    #[test]
    fn test_io_error_converts() {
        fn open_missing() -> Result<Vec<u8>> {
            Ok(std::fs::read("/nonexistent/scanport/settings.toml")?)
        }
        assert!(matches!(open_missing(), Err(Error::Io(_))));
    }
}
