//! Remote backend speaking the S3 REST dialect over plain HTTP(S).
//!
//! Authentication is a bearer token (typically a gateway in front of the
//! bucket); request signing is left to that gateway.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{validate_key, BlobStore, StoreError, StoreErrorCode};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis((self.base_backoff_ms.saturating_mul(factor)).min(self.max_backoff_ms))
    }
}

pub struct HttpObjectStore {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub retry: RetryPolicy,
    client: Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bearer_token: None,
            retry: RetryPolicy::default(),
            client: Client::new(),
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.endpoint, bucket)
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            bucket,
            encode_key(key.trim_start_matches('/'))
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send with retry on connection failures and 5xx responses
    async fn send<F>(&self, what: &str, build: F) -> Result<reqwest::Response, StoreError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match self.authorize(build()).send().await {
                Ok(resp) if resp.status().is_server_error() && attempt + 1 < self.retry.max_attempts => {
                    tracing::warn!(operation = what, status = %resp.status(), attempt, "Object store server error, retrying");
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 >= self.retry.max_attempts {
                        return Err(StoreError::new(StoreErrorCode::Network, format!("{}: {}", what, e)));
                    }
                    tracing::warn!(operation = what, error = %e, attempt, "Object store request failed, retrying");
                }
            }
            attempt += 1;
            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
        }
    }

    fn unexpected(what: &str, status: StatusCode) -> StoreError {
        let code = match status {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => StoreErrorCode::Conflict,
            StatusCode::BAD_REQUEST => StoreErrorCode::Validation,
            _ => StoreErrorCode::Network,
        };
        StoreError::new(code, format!("{} failed: {}", what, status))
    }
}

#[async_trait]
impl BlobStore for HttpObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let url = self.bucket_url(bucket);
            let resp = self
                .send("list", || {
                    let mut query = vec![("list-type", "2".to_string()), ("prefix", prefix.to_string())];
                    if let Some(t) = &token {
                        query.push(("continuation-token", t.clone()));
                    }
                    self.client.get(&url).query(&query)
                })
                .await?;

            if resp.status() == StatusCode::NOT_FOUND {
                return Err(StoreError::new(
                    StoreErrorCode::NotFound,
                    format!("bucket {} does not exist", bucket),
                ));
            }
            if !resp.status().is_success() {
                return Err(Self::unexpected("list", resp.status()));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))?;
            let page = parse_list_page(&body);
            keys.extend(page.keys.into_iter().filter(|k| !k.ends_with('/')));

            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;
        let url = self.object_url(bucket, key);
        let resp = self.send("read", || self.client.get(&url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(bucket, key));
        }
        if !resp.status().is_success() {
            return Err(Self::unexpected("read", resp.status()));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))
    }

    async fn write(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        let url = self.object_url(bucket, key);
        let resp = self
            .send("write", || self.client.put(&url).body(data.to_vec()))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::unexpected("write", resp.status()));
        }
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        validate_key(src_key)?;
        validate_key(dst_key)?;
        let url = self.object_url(dst_bucket, dst_key);
        let source = format!("/{}/{}", src_bucket, encode_key(src_key.trim_start_matches('/')));
        let resp = self
            .send("copy", || {
                self.client
                    .put(&url)
                    .header("x-amz-copy-source", source.as_str())
            })
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(src_bucket, src_key));
        }
        if !resp.status().is_success() {
            return Err(Self::unexpected("copy", resp.status()));
        }
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let url = self.object_url(bucket, key);
        let resp = self.send("delete", || self.client.delete(&url)).await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::unexpected("delete", resp.status()))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        let url = self.object_url(bucket, key);
        let resp = self.send("exists", || self.client.head(&url)).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Self::unexpected("exists", s)),
        }
    }
}

/// Unreserved URL characters plus the `/` separator pass through unescaped
const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ESCAPE).to_string()
}

#[derive(Debug, Default, PartialEq)]
struct ListPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

/// Pull the fields we need out of a ListObjectsV2 XML response
fn parse_list_page(xml: &str) -> ListPage {
    let mut page = ListPage::default();
    let mut rest = xml;
    while let Some(start) = rest.find("<Key>") {
        let after = &rest[start + 5..];
        match after.find("</Key>") {
            Some(end) => {
                page.keys.push(xml_unescape(&after[..end]));
                rest = &after[end + 6..];
            }
            None => break,
        }
    }
    page.truncated = element_text(xml, "IsTruncated").map(|v| v == "true").unwrap_or(false);
    page.next_token = element_text(xml, "NextContinuationToken").map(|v| xml_unescape(&v));
    page
}

fn element_text(xml: &str, name: &str) -> Option<String> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key_keeps_separators() {
        assert_eq!(encode_key("Archive/123 a+b.zip"), "Archive/123%20a%2Bb.zip");
    }

    #[test]
    fn test_parse_list_page_truncated() {
        let xml = r#"<?xml version="1.0"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>Archive/1-01-01-2020-00-00-00.zip</Key></Contents>
  <Contents><Key>Archive/</Key></Contents>
  <Contents><Key>Archive/a&amp;b.zip</Key></Contents>
  <NextContinuationToken>abc==</NextContinuationToken>
</ListBucketResult>"#;
        let page = parse_list_page(xml);
        assert_eq!(
            page.keys,
            vec![
                "Archive/1-01-01-2020-00-00-00.zip".to_string(),
                "Archive/".to_string(),
                "Archive/a&b.zip".to_string()
            ]
        );
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("abc=="));
    }

    #[test]
    fn test_encode_key_escapes_non_ascii() {
        assert_eq!(encode_key("Uploads/é&x.json"), "Uploads/%C3%A9%26x.json");
    }

    #[test]
    fn test_parse_list_page_unescapes_entity_keys() {
        let xml = "<ListBucketResult><IsTruncated>false</IsTruncated>\
            <Contents><Key>Overlay/R&amp;D &lt;v2&gt;/custom-meta.json</Key></Contents>\
            <Contents><Key>Overlay/&amp;lt;literal.json</Key></Contents>\
            </ListBucketResult>";
        let page = parse_list_page(xml);
        assert_eq!(
            page.keys,
            vec![
                "Overlay/R&D <v2>/custom-meta.json".to_string(),
                // An escaped ampersand is decoded once, not twice
                "Overlay/&lt;literal.json".to_string(),
            ]
        );
        assert_eq!(encode_key(&page.keys[0]), "Overlay/R%26D%20%3Cv2%3E/custom-meta.json");
    }

    #[test]
    fn test_parse_list_page_last() {
        let page = parse_list_page("<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>");
        assert!(page.keys.is_empty());
        assert!(!page.truncated);
        assert_eq!(page.next_token, None);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(2000));
    }
}
