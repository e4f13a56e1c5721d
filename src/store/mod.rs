//! Object store boundary.
//!
//! Everything the gateway needs from a bucket backend goes through the
//! [`ObjectStore`] trait: paginated listing, metadata lookup, URL signing,
//! ranged reads, streamed writes and deletes. Handlers never talk to a
//! concrete backend directly; they receive an `Arc<dyn ObjectStore>` from
//! application state.

pub mod local;
#[cfg(test)]
pub mod memory;
pub mod signing;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{io, pin::Pin};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Identifies one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    /// Hierarchical name using `/` as separator.
    pub name: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

/// Metadata the backend reports for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMetadata {
    pub name: String,
    /// Backend generation number; changes on every overwrite.
    pub generation: i64,
    pub updated_at: DateTime<Utc>,
    pub content_type: Option<String>,
    pub size: u64,
}

/// One page of a listing call.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<ObjectMetadata>,
    /// Opaque cursor for the next page, `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
}

impl ListPage {
    pub fn count(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{name}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, name: String },
    #[error("invalid object name `{0}`")]
    InvalidName(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid page token")]
    InvalidPageToken,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn not_found(object: &ObjectRef) -> Self {
        StoreError::NotFound {
            bucket: object.bucket.clone(),
            name: object.name.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// The request itself was malformed; retrying it unchanged cannot help.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidName(_)
                | StoreError::InvalidBucketName { .. }
                | StoreError::InvalidPageToken
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Body handed to [`ObjectStore::write_stream`]. Consumed until EOF.
pub type ObjectReader<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

/// Result of a readiness probe against the backend.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

/// Capability interface of a bucket backend.
///
/// Implementations must be cheap to share across requests; the gateway keeps a
/// single `Arc<dyn ObjectStore>` and passes it into every pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of objects whose names start with `prefix`, in name order.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> StoreResult<ListPage>;

    /// Look up a single object's metadata.
    async fn metadata(&self, object: &ObjectRef) -> StoreResult<ObjectMetadata>;

    /// Produce a URL granting `GET` access to `object` until `expires_at`.
    async fn sign_url(&self, object: &ObjectRef, expires_at: DateTime<Utc>)
    -> StoreResult<String>;

    /// Read bytes `start..end` (end exclusive). Returns fewer bytes when the
    /// object ends before `end`.
    async fn read_range(&self, object: &ObjectRef, start: u64, end: u64) -> StoreResult<Bytes>;

    /// Create or overwrite `object` with everything `reader` yields.
    async fn write_stream(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        reader: ObjectReader<'_>,
    ) -> StoreResult<ObjectMetadata>;

    /// Remove `object`. Returns [`StoreError::NotFound`] when it does not exist.
    async fn delete(&self, object: &ObjectRef) -> StoreResult<()>;

    /// Backend-specific readiness checks.
    async fn health(&self) -> Vec<HealthCheck> {
        Vec::new()
    }
}
