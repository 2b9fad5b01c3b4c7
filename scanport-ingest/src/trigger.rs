//! Trigger payload decoding
//!
//! Two shapes are accepted:
//! - reprocess: `{"datasetID":"<scanId>","jobID":"<jobId>"}`
//! - delivery: an object-store event, `{"Records":[{"eventSource":"aws:s3","s3":{...}}]}`

use chrono::Utc;
use percent_encoding::percent_decode_str;
use rand::Rng;
use serde::Deserialize;

use crate::archive::decode_bundle_name;
use crate::error::{IngestError, Result};

/// Job id prefix for imports started by a delivery rather than a user
pub const AUTO_IMPORT_JOB_PREFIX: &str = "auto-import";

const OBJECT_STORE_EVENT_SOURCE: &str = "aws:s3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrigger {
    pub scan_id: String,
    pub source_bucket: Option<String>,
    pub source_key: Option<String>,
    pub job_id: String,
}

impl DecodedTrigger {
    pub fn is_auto_import(&self) -> bool {
        self.job_id.starts_with(AUTO_IMPORT_JOB_PREFIX)
    }
}

#[derive(Debug, Deserialize)]
struct ReprocessRequest {
    #[serde(rename = "datasetID", default)]
    dataset_id: String,
    #[serde(rename = "jobID", default)]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StoreEvent {
    #[serde(rename = "Records", default)]
    records: Vec<StoreEventRecord>,
}

#[derive(Debug, Deserialize)]
struct StoreEventRecord {
    #[serde(rename = "eventSource", default)]
    event_source: String,
    #[serde(default)]
    s3: StoreEventEntity,
}

#[derive(Debug, Default, Deserialize)]
struct StoreEventEntity {
    #[serde(default)]
    bucket: NamedBucket,
    #[serde(default)]
    object: NamedObject,
}

#[derive(Debug, Default, Deserialize)]
struct NamedBucket {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct NamedObject {
    #[serde(default)]
    key: String,
}

/// Decode a raw trigger payload
pub fn decode_trigger(payload: &[u8]) -> Result<DecodedTrigger> {
    let text = String::from_utf8_lossy(payload);

    if text.contains("\"datasetID\":") {
        let req: ReprocessRequest = serde_json::from_slice(payload).map_err(|e| {
            IngestError::MalformedTrigger(format!("Failed to decode dataset reprocess trigger: {}", e))
        })?;

        if req.dataset_id.is_empty() {
            return Err(IngestError::MalformedTrigger(
                "Failed to find dataset ID in reprocess trigger".to_string(),
            ));
        }
        if req.job_id.is_empty() {
            return Err(IngestError::MalformedTrigger(
                "Failed to find job ID in reprocess trigger".to_string(),
            ));
        }

        return Ok(DecodedTrigger {
            scan_id: req.dataset_id,
            source_bucket: None,
            source_key: None,
            job_id: req.job_id,
        });
    }

    let event: StoreEvent = serde_json::from_slice(payload).map_err(|e| {
        IngestError::MalformedTrigger(format!("Failed to decode dataset import trigger: {}", e))
    })?;

    let record = match event.records.first() {
        Some(r) if r.event_source == OBJECT_STORE_EVENT_SOURCE => r,
        _ => {
            return Err(IngestError::MalformedTrigger(
                "Unexpected or no message type embedded in triggering SNS message".to_string(),
            ))
        }
    };

    let source_key = decode_object_key(&record.s3.object.key);
    let source_bucket = record.s3.bucket.name.clone();

    let bundle = decode_bundle_name(&source_key).map_err(|e| {
        IngestError::BadBundleName(format!("Expected archive file, got: {}. Error: {}", source_key, e))
    })?;

    Ok(DecodedTrigger {
        scan_id: bundle.scan_id,
        source_bucket: non_empty(source_bucket),
        source_key: non_empty(source_key),
        job_id: auto_import_job_id(),
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// `auto-import-<dd-Mon-yyyy HH-MM-SS> (<8 random [a-z0-9]>)`
pub fn auto_import_job_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!(
        "{}-{} ({})",
        AUTO_IMPORT_JOB_PREFIX,
        Utc::now().format("%d-%b-%Y %H-%M-%S"),
        suffix
    )
}

/// Object-store events form-encode keys: `+` is a space, `%XX` a byte
fn decode_object_key(key: &str) -> String {
    let spaced = key.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
