//! Utility modules for scanport-ingest

pub mod cancel;
pub mod db_retry;

pub use cancel::with_cancel;
pub use db_retry::retry_on_lock;
