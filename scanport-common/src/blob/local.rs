//! Local filesystem backend: a container is a root directory

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{validate_key, BlobStore, StoreError, StoreErrorCode};

#[derive(Debug, Clone, Default)]
pub struct LocalFsStore;

impl LocalFsStore {
    pub fn new() -> Self {
        Self
    }

    fn object_path(container: &str, key: &str) -> PathBuf {
        Path::new(container).join(key.trim_start_matches('/'))
    }

    fn map_io(container: &str, key: &str, err: std::io::Error) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::not_found(container, key)
        } else {
            StoreError::new(StoreErrorCode::Io, format!("{}/{}: {}", container, key, err))
        }
    }

    /// Write via a sibling temp file and rename so readers never see a partial object
    async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Blocking enumeration, run on the blocking pool
    fn list_blocking(container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = Path::new(container);
        if !root.exists() {
            return Ok(Vec::new());
        }

        // Walk only the deepest directory the prefix fully names, then filter
        // by string prefix so that "Archive/12" also matches "Archive/123-...".
        let prefix = prefix.trim_start_matches('/');
        let walk_from = match prefix.rfind('/') {
            Some(pos) => root.join(&prefix[..pos]),
            None => root.to_path_buf(),
        };
        if !walk_from.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&walk_from).follow_links(true) {
            let entry = entry.map_err(|e| StoreError::new(StoreErrorCode::Io, e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            // In-flight temp files from write_atomic are not objects
            let is_temp = rel
                .file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    n.starts_with('.') && n.ends_with(".tmp")
                })
                .unwrap_or(false);

            if !is_temp && key.starts_with(prefix) && !key.ends_with('/') {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl BlobStore for LocalFsStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let container = container.to_string();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || Self::list_blocking(&container, &prefix))
            .await
            .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("list task failed: {}", e)))?
    }

    async fn read(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;
        tokio::fs::read(Self::object_path(container, key))
            .await
            .map_err(|e| Self::map_io(container, key, e))
    }

    async fn write(&self, container: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        Self::write_atomic(&Self::object_path(container, key), data)
            .await
            .map_err(|e| Self::map_io(container, key, e))
    }

    async fn copy(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        validate_key(src_key)?;
        validate_key(dst_key)?;
        let data = tokio::fs::read(Self::object_path(src_container, src_key))
            .await
            .map_err(|e| Self::map_io(src_container, src_key, e))?;
        Self::write_atomic(&Self::object_path(dst_container, dst_key), &data)
            .await
            .map_err(|e| Self::map_io(dst_container, dst_key, e))
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match tokio::fs::remove_file(Self::object_path(container, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io(container, key, e)),
        }
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        match tokio::fs::metadata(Self::object_path(container, key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io(container, key, e)),
        }
    }
}
