//! Error types for scanport-ingest
//!
//! Every variant carries the literal message that is surfaced to the job log
//! and persisted as `JobRecord.message` when a job fails.

use scanport_common::{StoreError, StoreErrorCode};
use thiserror::Error;

/// Ingest pipeline error
#[derive(Debug, Error)]
pub enum IngestError {
    /// Trigger payload not recognized, or a required field is missing
    #[error("{0}")]
    MalformedTrigger(String),

    /// A bundle file name does not parse as `<scanId>-DD-MM-YYYY-HH-MM-SS.zip`
    #[error("{0}")]
    BadBundleName(String),

    /// Overlay key matches neither recognized layout
    #[error("{0}")]
    MalformedOverlayPath(String),

    /// Expected artifact is absent
    #[error("{0}")]
    NotFound(String),

    /// Dispatcher could not select a converter
    #[error("{0}")]
    UnknownFormat(String),

    /// Converter panicked
    #[error("Converter crashed: {0}")]
    ConverterCrashed(String),

    /// Archive entry tried to escape the extraction root
    #[error("{0}")]
    ZipTraversalRejected(String),

    #[error("{0}")]
    ZipCorrupt(String),

    /// Instrument log timestamp went backwards
    #[error("Timestamp is not incremental on line {line}: \"{literal}\"")]
    NonMonotonicTime { line: usize, literal: String },

    /// Instrument log line could not be tokenized
    #[error("Line {line}: {message}: \"{literal}\"")]
    TokenizerSyntax {
        line: usize,
        message: String,
        literal: String,
    },

    /// Blob store failure other than not-found
    #[error("{0}")]
    Store(StoreError),

    #[error("{0}")]
    Db(#[from] scanport_common::Error),

    /// Image name already owned by a different origin scan
    #[error("{0}")]
    ImageConflict(String),

    #[error("{0}")]
    UnsupportedImageCompression(String),

    #[error("{0}")]
    ImageDecode(String),

    /// Converter reported a failure
    #[error("{0}")]
    Converter(String),

    /// Hard rate limit exceeded
    #[error("{0}")]
    RateLimited(String),

    #[error("Ingest cancelled")]
    Cancelled,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err.code {
            StoreErrorCode::NotFound => IngestError::NotFound(err.message),
            _ => IngestError::Store(err),
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Db(scanport_common::Error::Database(err))
    }
}

impl IngestError {
    /// Short kind name recorded alongside the job log
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MalformedTrigger(_) => "MalformedTrigger",
            IngestError::BadBundleName(_) => "BadBundleName",
            IngestError::MalformedOverlayPath(_) => "MalformedOverlayPath",
            IngestError::NotFound(_) => "NotFound",
            IngestError::UnknownFormat(_) => "UnknownFormat",
            IngestError::ConverterCrashed(_) => "ConverterCrashed",
            IngestError::ZipTraversalRejected(_) => "ZipTraversalRejected",
            IngestError::ZipCorrupt(_) => "ZipCorrupt",
            IngestError::NonMonotonicTime { .. } => "NonMonotonicTime",
            IngestError::TokenizerSyntax { .. } => "TokenizerSyntax",
            IngestError::Store(_) => "StoreError",
            IngestError::Db(_) => "DBError",
            IngestError::ImageConflict(_) => "ImageConflict",
            IngestError::UnsupportedImageCompression(_) => "UnsupportedImageCompression",
            IngestError::ImageDecode(_) => "ImageDecode",
            IngestError::Converter(_) => "Converter",
            IngestError::RateLimited(_) => "RateLimited",
            IngestError::Cancelled => "Cancelled",
            IngestError::Io(_) => "Io",
        }
    }
}

/// Result type for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;
