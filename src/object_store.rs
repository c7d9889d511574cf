//! Blob storage used by the audit log.
//!
//! Objects carry an opaque version token (an ETag on HTTP backends) so
//! writers can do compare-and-swap instead of blind overwrites.

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;

/// An object body together with the version it was read at.
///
/// `version` is `None` when the backend does not hand out version tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: String,
    pub version: Option<String>,
}

/// Precondition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Overwrite whatever is there.
    Unconditional,
    /// Succeed only if the object does not exist yet.
    IfAbsent,
    /// Succeed only if the object is still at this version.
    IfVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write precondition no longer holds; re-read and retry.
    PreconditionFailed,
    /// Any other backend failure.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::PreconditionFailed => write!(f, "precondition failed"),
            StoreError::Backend(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `Ok(None)` when the key does not exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Writes the full body and returns the new version token.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: String,
        condition: WriteCondition,
    ) -> Result<String, StoreError>;
}

/// Process-local store. Versions are a per-store counter.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    objects: HashMap<(String, String), StoredObject>,
    next_version: u64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current body of an object, if any.
    pub async fn body(&self, bucket: &str, key: &str) -> Option<String> {
        let state = self.inner.lock().await;
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let state = self.inner.lock().await;
        let mut keys: Vec<String> = state
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: String,
        condition: WriteCondition,
    ) -> Result<String, StoreError> {
        let mut state = self.inner.lock().await;
        let id = (bucket.to_string(), key.to_string());
        let current = state.objects.get(&id).map(|o| o.version.as_deref());

        let allowed = match (&condition, current) {
            (WriteCondition::Unconditional, _) => true,
            (WriteCondition::IfAbsent, None) => true,
            (WriteCondition::IfAbsent, Some(_)) => false,
            (WriteCondition::IfVersion(expected), Some(actual)) => {
                actual == Some(expected.as_str())
            }
            (WriteCondition::IfVersion(_), None) => false,
        };
        if !allowed {
            return Err(StoreError::PreconditionFailed);
        }

        state.next_version += 1;
        let version = state.next_version.to_string();
        state.objects.insert(
            id,
            StoredObject {
                body,
                version: Some(version.clone()),
            },
        );
        Ok(version)
    }
}

/// S3-style HTTP object store: `GET`/`PUT {base_url}/{bucket}/{key}`.
///
/// Conditional writes use `If-Match` / `If-None-Match: *`; a 412 response
/// means the precondition failed.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Backend(format!("Failed to create storage client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<url::Url, StoreError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| StoreError::Backend(format!("Invalid storage URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Backend("Storage URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let url = self.object_url(bucket, key)?;
        tracing::debug!("Reading object {}/{}", bucket, key);

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("Storage request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StoreError::Backend(format!(
                "Storage returned {}: {}",
                status, error_text
            )));
        }

        let version = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if version.is_none() {
            tracing::debug!("Object {}/{} has no ETag", bucket, key);
        }
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read object body: {}", e)))?;

        Ok(Some(StoredObject { body, version }))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: String,
        condition: WriteCondition,
    ) -> Result<String, StoreError> {
        let url = self.object_url(bucket, key)?;
        tracing::debug!("Writing object {}/{} ({:?})", bucket, key, condition);

        let mut request = self
            .authorize(self.client.put(url))
            .header(header::CONTENT_TYPE, "text/csv")
            .body(body);
        request = match condition {
            WriteCondition::Unconditional => request,
            WriteCondition::IfAbsent => request.header(header::IF_NONE_MATCH, "*"),
            WriteCondition::IfVersion(ref etag) => request.header(header::IF_MATCH, etag.as_str()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("Storage request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED || status == StatusCode::CONFLICT {
            return Err(StoreError::PreconditionFailed);
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StoreError::Backend(format!(
                "Storage write returned {}: {}",
                status, error_text
            )));
        }

        Ok(response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default())
    }
}
