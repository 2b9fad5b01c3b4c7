//! Raw bundle archive
//!
//! The archive for scan `S` is every bundle whose file name begins `S-`.
//! Admission is the only write path. Bundles are replayed onto the working
//! tree oldest first, so later deliveries overwrite earlier files.

pub mod filenames;
pub mod unzip;

pub use filenames::{base_name, decode_bundle_name, encode_bundle_name, BundleName};

use scanport_common::BlobStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, Result};
use crate::job_log::JobLog;
use crate::utils::cancel::check_cancelled;
use crate::utils::with_cancel;
use crate::working_tree::WorkingTree;

/// One archived bundle, as listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedBundle {
    pub key: String,
    pub scan_id: String,
    pub timestamp_unix_sec: i64,
}

/// Outcome of replaying the archive onto a working tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Materialized {
    pub bundle_count: usize,
    pub file_count: usize,
    /// Timestamp of the newest bundle applied
    pub last_timestamp_unix_sec: Option<i64>,
}

pub struct ArchiveManager {
    store: Arc<dyn BlobStore>,
    container: String,
    root: String,
}

impl ArchiveManager {
    pub fn new(store: Arc<dyn BlobStore>, container: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            root: root.into(),
        }
    }

    /// `<archiveRoot>/<basename>`
    pub fn archive_key(&self, source_key: &str) -> String {
        format!("{}/{}", self.root, base_name(source_key))
    }

    /// Copy a delivered bundle into the archive unless it is already there.
    ///
    /// Returns `false` when the bundle was archived before; nothing is copied.
    pub async fn admit(&self, source_bucket: &str, source_key: &str, log: &JobLog) -> Result<bool> {
        let dest_key = self.archive_key(source_key);

        if self.store.exists(&self.container, &dest_key).await? {
            return Ok(false);
        }

        log.info(format!(
            "Archiving {}/{} to {}/{}",
            source_bucket, source_key, self.container, dest_key
        ));
        self.store
            .copy(source_bucket, source_key, &self.container, &dest_key)
            .await?;

        Ok(true)
    }

    /// All bundles for `scan_id`, oldest first (ties broken by key)
    ///
    /// `<root>/<scanId>/` is listed first. Only when that is empty is the bare
    /// `<root>/<scanId>` prefix tried; bundles it turns up for a different
    /// scan sharing the prefix are skipped.
    pub async fn list_ordered(&self, scan_id: &str, log: &JobLog) -> Result<Vec<ArchivedBundle>> {
        let dir_prefix = format!("{}/{}/", self.root, scan_id);
        log.info(format!("Searching for archived files in: {}/{}", self.container, dir_prefix));
        let mut keys = self.store.list(&self.container, &dir_prefix).await?;
        let mut filter_other_scans = false;

        if keys.is_empty() {
            let bare_prefix = format!("{}/{}", self.root, scan_id);
            log.info(format!(
                "Searching again for archived files in: {}/{}",
                self.container, bare_prefix
            ));
            keys = self.store.list(&self.container, &bare_prefix).await?;
            filter_other_scans = true;
        }

        let mut bundles = Vec::with_capacity(keys.len());
        for key in keys {
            let decoded = decode_bundle_name(&key)?;
            let name = base_name(&key);
            if !name.ends_with(".zip") {
                return Err(IngestError::BadBundleName(format!("Expected zip file, got: {}", name)));
            }
            if filter_other_scans && decoded.scan_id != scan_id {
                tracing::debug!(key = %key, scan_id, "Skipping bundle of another scan sharing the prefix");
                continue;
            }
            bundles.push(ArchivedBundle {
                key,
                scan_id: decoded.scan_id,
                timestamp_unix_sec: decoded.timestamp_unix_sec,
            });
        }

        bundles.sort_by(|a, b| {
            a.timestamp_unix_sec
                .cmp(&b.timestamp_unix_sec)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(bundles)
    }

    /// Download and extract every bundle into `tree`, oldest first
    pub async fn materialize(
        &self,
        scan_id: &str,
        tree: &WorkingTree,
        log: &JobLog,
        cancel: &CancellationToken,
    ) -> Result<Materialized> {
        log.info("Downloading archived zip files...");

        let bundles = self.list_ordered(scan_id, log).await?;
        let mut result = Materialized::default();

        for bundle in &bundles {
            check_cancelled(cancel)?;

            let bytes = with_cancel(cancel, self.store.read(&self.container, &bundle.key)).await?;
            let zip_path = tree.download_dir().join(base_name(&bundle.key));
            tokio::fs::write(&zip_path, &bytes).await?;

            let unzip_from = zip_path.clone();
            let unzip_to = tree.unzipped_dir().to_path_buf();
            let names = tokio::task::spawn_blocking(move || unzip::unzip_into(&unzip_from, &unzip_to))
                .await
                .map_err(|e| IngestError::ZipCorrupt(format!("Unzip task failed: {}", e)))??;
            result.file_count += names.len();

            if let Err(e) = tokio::fs::remove_file(&zip_path).await {
                log.error(format!(
                    "Failed to delete zip file after unzipping: \"{}\". Error: {}",
                    zip_path.display(),
                    e
                ));
            }

            result.bundle_count += 1;
            result.last_timestamp_unix_sec = Some(bundle.timestamp_unix_sec);
        }

        log.info(format!(
            "Downloaded {} zip files, unzipped {} files. Last file name: {}",
            result.bundle_count,
            result.file_count,
            bundles.last().map(|b| b.key.as_str()).unwrap_or("")
        ));

        Ok(result)
    }
}

/// Download a manually uploaded dataset from `<uploadsRoot>/<scanId>/`.
///
/// ZIPs are extracted into `unzipped/<zip stem>/`; other files land directly
/// in `unzipped/`. Returns the number of files fetched.
pub async fn fetch_manual_upload(
    store: &dyn BlobStore,
    container: &str,
    uploads_root: &str,
    scan_id: &str,
    tree: &WorkingTree,
    log: &JobLog,
    cancel: &CancellationToken,
) -> Result<usize> {
    let prefix = format!("{}/{}/", uploads_root, scan_id);
    let keys = match store.list(container, &prefix).await {
        Ok(keys) => keys,
        Err(e) if store.is_not_found(&e) => {
            log.warn(format!("No manual upload area found for {}: {}", scan_id, e));
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    for key in &keys {
        check_cancelled(cancel)?;

        let name = base_name(key);
        let bytes = with_cancel(cancel, store.read(container, key)).await?;

        match name.strip_suffix(".zip") {
            Some(stem) => {
                let zip_path = tree.download_dir().join(name);
                tokio::fs::write(&zip_path, &bytes).await?;

                let unzip_from = zip_path.clone();
                let unzip_to = tree.unzipped_dir().join(stem);
                tokio::task::spawn_blocking(move || unzip::unzip_into(&unzip_from, &unzip_to))
                    .await
                    .map_err(|e| IngestError::ZipCorrupt(format!("Unzip task failed: {}", e)))??;

                if let Err(e) = tokio::fs::remove_file(&zip_path).await {
                    log.error(format!(
                        "Failed to delete zip file after unzipping: \"{}\". Error: {}",
                        zip_path.display(),
                        e
                    ));
                }
            }
            None => {
                tokio::fs::write(tree.unzipped_dir().join(name), &bytes).await?;
            }
        }
    }

    log.info(format!(
        "Dataset {} downloaded {} files from manual upload area",
        scan_id,
        keys.len()
    ));
    Ok(keys.len())
}
