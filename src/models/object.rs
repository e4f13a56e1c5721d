//! Row shape of the `objects` table used by the local store.

use crate::store::ObjectMetadata;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Metadata for a single stored object, as persisted in SQLite.
///
/// Payload bytes live on disk; this row only records what the listing and
/// download paths need to know about them.
#[derive(Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Object name within its bucket.
    pub name: String,

    /// Content type (MIME type) declared on upload.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: String,

    /// Bumped on every overwrite.
    pub generation: i64,

    /// Timestamp of the last write.
    pub updated_at: DateTime<Utc>,
}

impl From<StoredObject> for ObjectMetadata {
    fn from(row: StoredObject) -> Self {
        ObjectMetadata {
            name: row.name,
            generation: row.generation,
            updated_at: row.updated_at,
            content_type: row.content_type,
            size: row.size_bytes.max(0) as u64,
        }
    }
}
