//! User overlays layered onto the working tree
//!
//! Recognized keys under the overlay container:
//! - `<overlayRoot>/<scanId>/custom-meta.json`
//! - `<overlayRoot>/<scanId>/<subdir>/.../<file>`, copied to `unzipped/<subdir>/.../<file>`

use scanport_common::BlobStore;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, Result};
use crate::job_log::JobLog;
use crate::models::CustomMeta;
use crate::utils::cancel::check_cancelled;
use crate::utils::with_cancel;
use crate::working_tree::WorkingTree;

pub const CUSTOM_META_FILE: &str = "custom-meta.json";

#[derive(Debug, Default)]
pub struct OverlayOutcome {
    pub file_count: usize,
    pub custom_meta: Option<CustomMeta>,
}

/// Where an overlay key lands, relative to `unzipped/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayTarget {
    CustomMeta,
    File(Vec<String>),
}

/// Map an overlay key onto the working tree
pub fn decode_overlay_path(key: &str, overlay_root: &str, scan_id: &str) -> Result<OverlayTarget> {
    let invalid = || IngestError::MalformedOverlayPath(format!("Manual upload path invalid: {}", key));

    let trimmed = key.trim_start_matches('/');
    let prefix = format!("{}/{}/", overlay_root.trim_matches('/'), scan_id);
    let rest = trimmed.strip_prefix(&prefix).ok_or_else(invalid)?;

    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|p| p.is_empty() || *p == "..") {
        return Err(invalid());
    }

    match parts.as_slice() {
        [single] if *single == CUSTOM_META_FILE => Ok(OverlayTarget::CustomMeta),
        [_single] => Err(invalid()),
        many => Ok(OverlayTarget::File(many.iter().map(|s| s.to_string()).collect())),
    }
}

/// Fetch every overlay for `scan_id` into `tree`, after archive bundles
pub async fn apply_overlays(
    store: &dyn BlobStore,
    container: &str,
    overlay_root: &str,
    scan_id: &str,
    tree: &WorkingTree,
    log: &JobLog,
    cancel: &CancellationToken,
) -> Result<OverlayOutcome> {
    let prefix = format!("{}/{}/", overlay_root.trim_matches('/'), scan_id);
    let keys = store.list(container, &prefix).await?;

    let mut outcome = OverlayOutcome::default();
    if keys.is_empty() {
        return Ok(outcome);
    }

    log.info("Downloading user customisation files...");

    for key in &keys {
        check_cancelled(cancel)?;

        let target = decode_overlay_path(key, overlay_root, scan_id)?;
        let bytes = with_cancel(cancel, store.read(container, key)).await?;

        let save_path: PathBuf = match &target {
            OverlayTarget::CustomMeta => {
                match serde_json::from_slice::<CustomMeta>(&bytes) {
                    Ok(meta) => outcome.custom_meta = Some(meta),
                    Err(e) => log.warn(format!("Ignoring unreadable {}: {}", key, e)),
                }
                tree.unzipped_dir().join(CUSTOM_META_FILE)
            }
            OverlayTarget::File(parts) => parts
                .iter()
                .fold(tree.unzipped_dir().to_path_buf(), |p, part| p.join(part)),
        };

        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&save_path, &bytes).await?;
        outcome.file_count += 1;
    }

    Ok(outcome)
}
