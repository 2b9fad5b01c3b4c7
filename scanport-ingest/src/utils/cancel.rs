//! Racing I/O against job cancellation

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, Result};

/// Await `fut`, failing with [`IngestError::Cancelled`] if `cancel` fires first
pub async fn with_cancel<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<IngestError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        res = fut => res.map_err(Into::into),
    }
}

/// Fail fast between pipeline steps
pub fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(IngestError::Cancelled)
    } else {
        Ok(())
    }
}
