//! Local-directory containers and a scratch database for one test

use scanport_common::blob::LocalFsStore;
use scanport_common::BlobStore;
use scanport_ingest::{IngestConfig, IngestContext};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Every container is a directory under one temp root.
///
/// The TempDir must outlive the test, so the sandbox owns it.
pub struct Sandbox {
    pub dir: TempDir,
    pub config: IngestConfig,
    pub pool: SqlitePool,
    pub store: Arc<dyn BlobStore>,
    /// Where deliveries arrive before admission
    pub inbox: PathBuf,
}

impl Sandbox {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let container = |name: &str| {
            let path = dir.path().join(name);
            std::fs::create_dir_all(&path).unwrap();
            path.to_string_lossy().into_owned()
        };

        let config = IngestConfig {
            env_name: "test".to_string(),
            config_container: container("config"),
            datasets_container: container("datasets"),
            overlay_container: container("overlays"),
            uploads_container: container("uploads"),
            archive_container: container("archive"),
            working_dir_base: Some(dir.path().join("work")),
            ..IngestConfig::default()
        };
        let inbox = PathBuf::from(container("inbox"));

        let pool = scanport_common::db::init_database(&dir.path().join("scanport.db"))
            .await
            .unwrap();

        Self {
            dir,
            config,
            pool,
            store: Arc::new(LocalFsStore::new()),
            inbox,
        }
    }

    pub fn context(&self) -> IngestContext {
        IngestContext::new(self.config.clone(), self.pool.clone()).with_store(Arc::clone(&self.store))
    }

    /// Drop a bundle into the delivery inbox, returning its key
    pub fn deliver(&self, name: &str, bytes: &[u8]) -> String {
        std::fs::write(self.inbox.join(name), bytes).unwrap();
        name.to_string()
    }

    pub fn inbox_name(&self) -> String {
        self.inbox.to_string_lossy().into_owned()
    }

    pub async fn put(&self, container: &str, key: &str, bytes: &[u8]) {
        self.store.write(container, key, bytes).await.unwrap();
    }

    pub async fn exists(&self, container: &str, key: &str) -> bool {
        self.store.exists(container, key).await.unwrap()
    }

    pub async fn read_bytes(&self, container: &str, key: &str) -> Vec<u8> {
        self.store.read(container, key).await.unwrap()
    }

    pub async fn read_text(&self, container: &str, key: &str) -> String {
        String::from_utf8(self.read_bytes(container, key).await).unwrap()
    }

    /// Number of job working directories still on disk
    pub fn working_dirs_left(&self) -> usize {
        let base: &Path = self.config.working_dir_base.as_deref().unwrap();
        match std::fs::read_dir(base) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// Object-store delivery event for `key` in `bucket`
pub fn delivery_trigger(bucket: &str, key: &str) -> Vec<u8> {
    serde_json::json!({
        "Records": [{
            "eventSource": "aws:s3",
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key }
            }
        }]
    })
    .to_string()
    .into_bytes()
}

pub fn reprocess_trigger(scan_id: &str, job_id: &str) -> Vec<u8> {
    serde_json::json!({ "datasetID": scan_id, "jobID": job_id })
        .to_string()
        .into_bytes()
}
