//! Blob store abstraction
//!
//! A keyed object space partitioned by *container*. For the local backend a
//! container is a root directory; for the remote backend it is a bucket.
//! Keys are `/`-separated and listings are pure key enumerations: no
//! directory markers are ever returned.
//!
//! Guarantees are per key within one container. There is no cross-container
//! transaction.

mod local;
mod remote;

pub use local::LocalFsStore;
pub use remote::{HttpObjectStore, RetryPolicy};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Failure category for blob store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    NotFound,
    Validation,
    Conflict,
    Network,
    Io,
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Network => "network",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

/// Error returned by every [`BlobStore`] operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(container: &str, key: &str) -> Self {
        Self::new(
            StoreErrorCode::NotFound,
            format!("{}/{} does not exist", container, key),
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for StoreError {}

/// Uniform capability set over local and remote object storage.
///
/// Implementations must be safe for concurrent use: a single instance is
/// shared by every job in the process.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// All keys in `container` starting with `prefix`, in lexicographic order.
    /// Provider pagination is followed transparently.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Read an object. Absent keys fail with [`StoreErrorCode::NotFound`].
    async fn read(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Create or overwrite an object. Readers never observe a partial write.
    async fn write(&self, container: &str, key: &str, data: &[u8]) -> Result<(), StoreError>;

    async fn copy(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<(), StoreError>;

    /// Delete an object. Deleting an absent key succeeds.
    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError>;

    fn is_not_found(&self, err: &StoreError) -> bool {
        err.code == StoreErrorCode::NotFound
    }
}

/// Read and parse a JSON document
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    container: &str,
    key: &str,
) -> Result<T, StoreError> {
    let bytes = store.read(container, key).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        StoreError::new(
            StoreErrorCode::Validation,
            format!("Failed to parse {}/{}: {}", container, key, e),
        )
    })
}

/// Serialize a value as pretty JSON and write it
pub async fn write_json<T: Serialize>(
    store: &dyn BlobStore,
    container: &str,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::new(StoreErrorCode::Validation, e.to_string()))?;
    store.write(container, key, &bytes).await
}

/// Characters dropped from object names on write
const DROPPED_NAME_CHARS: [char; 6] = ['?', '$', '#', '!', '\'', '"'];

/// Turn an arbitrary file name into a storable object name.
///
/// Path separators become `_`; characters object stores handle badly are dropped.
pub fn make_valid_object_name(name: &str) -> String {
    name.chars()
        .filter(|c| !DROPPED_NAME_CHARS.contains(c))
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// A stored name must be non-empty and must not contain a double quote
pub fn is_valid_object_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('"')
}

/// Validate a full key before it reaches a backend
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if !is_valid_object_name(key) {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            format!("Invalid object key: \"{}\"", key),
        ));
    }
    if key.split('/').any(|part| part == "..") {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            format!("Object key must not traverse upwards: {}", key),
        ));
    }
    Ok(())
}

/// Dispatches each call to a backend chosen from the container string.
///
/// `http://host[:port]/bucket` and `https://...` containers go to an
/// [`HttpObjectStore`] (one client per endpoint); anything else is treated as
/// a local root directory.
pub struct ContainerRouter {
    local: LocalFsStore,
    remote: Mutex<HashMap<String, Arc<HttpObjectStore>>>,
    bearer_token: Option<String>,
}

impl ContainerRouter {
    pub fn new() -> Self {
        Self {
            local: LocalFsStore::new(),
            remote: Mutex::new(HashMap::new()),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    /// Split `http(s)://host/bucket` into (endpoint, bucket)
    pub fn parse_remote_container(container: &str) -> Option<(String, String)> {
        let rest = container
            .strip_prefix("https://")
            .map(|r| ("https://", r))
            .or_else(|| container.strip_prefix("http://").map(|r| ("http://", r)))?;
        let (scheme, rest) = rest;
        let rest = rest.trim_end_matches('/');
        let slash = rest.rfind('/')?;
        let (host, bucket) = (&rest[..slash], &rest[slash + 1..]);
        if host.is_empty() || bucket.is_empty() {
            return None;
        }
        Some((format!("{}{}", scheme, host), bucket.to_string()))
    }

    fn route<'a>(&'a self, container: &'a str) -> Result<Route<'a>, StoreError> {
        match Self::parse_remote_container(container) {
            Some((endpoint, bucket)) => {
                let mut clients = self
                    .remote
                    .lock()
                    .map_err(|_| StoreError::new(StoreErrorCode::Io, "remote client cache poisoned"))?;
                let client = clients
                    .entry(endpoint.clone())
                    .or_insert_with(|| {
                        Arc::new(HttpObjectStore::new(endpoint).with_bearer_token(self.bearer_token.clone()))
                    })
                    .clone();
                Ok(Route::Remote(client, bucket))
            }
            None => Ok(Route::Local(container)),
        }
    }
}

impl Default for ContainerRouter {
    fn default() -> Self {
        Self::new()
    }
}

enum Route<'a> {
    Local(&'a str),
    Remote(Arc<HttpObjectStore>, String),
}

#[async_trait]
impl BlobStore for ContainerRouter {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        match self.route(container)? {
            Route::Local(root) => self.local.list(root, prefix).await,
            Route::Remote(client, bucket) => client.list(&bucket, prefix).await,
        }
    }

    async fn read(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        match self.route(container)? {
            Route::Local(root) => self.local.read(root, key).await,
            Route::Remote(client, bucket) => client.read(&bucket, key).await,
        }
    }

    async fn write(&self, container: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
        match self.route(container)? {
            Route::Local(root) => self.local.write(root, key, data).await,
            Route::Remote(client, bucket) => client.write(&bucket, key, data).await,
        }
    }

    async fn copy(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        let src = self.route(src_container)?;
        let dst = self.route(dst_container)?;
        match (src, dst) {
            (Route::Local(s), Route::Local(d)) => self.local.copy(s, src_key, d, dst_key).await,
            (Route::Remote(sc, sb), Route::Remote(dc, db)) if Arc::ptr_eq(&sc, &dc) => {
                sc.copy(&sb, src_key, &db, dst_key).await
            }
            // Across backends (or endpoints): stream through memory
            _ => {
                let bytes = self.read(src_container, src_key).await?;
                self.write(dst_container, dst_key, &bytes).await
            }
        }
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError> {
        match self.route(container)? {
            Route::Local(root) => self.local.delete(root, key).await,
            Route::Remote(client, bucket) => client.delete(&bucket, key).await,
        }
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        match self.route(container)? {
            Route::Local(root) => self.local.exists(root, key).await,
            Route::Remote(client, bucket) => client.exists(&bucket, key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_valid_object_name_drops_and_replaces() {
        assert_eq!(make_valid_object_name("a?b$c#d!e'f\"g"), "abcdefg");
        assert_eq!(make_valid_object_name("dir/sub\\file.png"), "dir_sub_file.png");
        assert_eq!(make_valid_object_name("plain-name_1.tif"), "plain-name_1.tif");
    }

    #[test]
    fn test_is_valid_object_name() {
        assert!(!is_valid_object_name(""));
        assert!(!is_valid_object_name("has\"quote"));
        assert!(is_valid_object_name("Archive/123-01-01-2020-00-00-00.zip"));
    }

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a/..b/c").is_ok());
    }

    #[test]
    fn test_parse_remote_container() {
        assert_eq!(
            ContainerRouter::parse_remote_container("https://store.example.org/raw-data"),
            Some(("https://store.example.org".to_string(), "raw-data".to_string()))
        );
        assert_eq!(
            ContainerRouter::parse_remote_container("http://localhost:9000/archive/"),
            Some(("http://localhost:9000".to_string(), "archive".to_string()))
        );
        assert_eq!(ContainerRouter::parse_remote_container("/var/lib/scanport/archive"), None);
        assert_eq!(ContainerRouter::parse_remote_container("http://hostonly"), None);
    }
}
