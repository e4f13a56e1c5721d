//! src/store/local.rs
//!
//! LocalStore: an `ObjectStore` backed by SQLite for metadata and local disk
//! for object payloads. Payload files are addressed by the MD5 of
//! `bucket/name` and sharded beneath `base_path/{bucket}/{shard}/{shard}/{digest}`,
//! so object names never have to be valid filesystem paths.
//!
//! Writes and deletes of one object are serialized inside the process, and a
//! payload only becomes visible together with the metadata row describing it.

use super::{
    HealthCheck, ListPage, ObjectMetadata, ObjectReader, ObjectRef, ObjectStore, StoreError,
    StoreResult, signing::UrlSigner,
};
use crate::models::object::StoredObject;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::{Mutex, MutexGuard},
};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_NAME_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const WRITE_BUFFER_SIZE: usize = 64 * 1024;
const WRITE_LOCK_STRIPES: usize = 64;

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    signer: UrlSigner,

    /// Striped by payload digest; held while a payload and its row change.
    write_locks: Arc<Vec<Mutex<()>>>,
}

impl LocalStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            signer,
            write_locks: Arc::new((0..WRITE_LOCK_STRIPES).map(|_| Mutex::new(())).collect()),
        }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn ensure_name_safe(&self, name: &str) -> StoreResult<()> {
        if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        if name.bytes().any(|b| b.is_ascii_control()) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Enforces bucket naming rules: 3-63 characters of lowercase letters,
    /// digits, dots, hyphens and underscores, starting and ending with a
    /// letter or digit, and not shaped like an IPv4 address.
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, hyphens, and underscores",
            ));
        }

        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    fn object_digest(object: &ObjectRef) -> md5::Digest {
        md5::compute(format!("{}/{}", object.bucket, object.name))
    }

    async fn lock_object(&self, object: &ObjectRef) -> MutexGuard<'_, ()> {
        let digest = Self::object_digest(object);
        let stripe = usize::from(digest[0]) % self.write_locks.len();
        self.write_locks[stripe].lock().await
    }

    /// Payload location: `base_path/{bucket}/{aa}/{bb}/{md5(bucket/name)}`.
    fn object_path(&self, object: &ObjectRef) -> PathBuf {
        let digest = Self::object_digest(object);
        let mut path = self.bucket_root(&object.bucket);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    async fn fetch_object(&self, object: &ObjectRef) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT name, content_type, size_bytes, etag, generation, updated_at
             FROM objects WHERE bucket = ? AND name = ?",
        )
        .bind(&object.bucket)
        .bind(&object.name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::not_found(object),
            other => StoreError::Sqlx(other),
        })
    }

    /// Recursively remove empty directories up to `stop` (exclusive).
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Upsert the row for a freshly written payload and move the payload from
    /// `tmp_path` to `file_path` before committing. The caller holds the
    /// object's write lock.
    async fn commit_payload(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        size_bytes: i64,
        etag: &str,
        tmp_path: &Path,
        file_path: &Path,
    ) -> StoreResult<StoredObject> {
        let mut tx = self.db.begin().await?;

        let updated_at = Utc::now();
        let row = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, bucket, name, content_type, size_bytes, etag, generation, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, name) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                generation = MAX(excluded.generation, objects.generation + 1),
                updated_at = excluded.updated_at
            RETURNING name, content_type, size_bytes, etag, generation, updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&object.bucket)
        .bind(&object.name)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind(updated_at.timestamp_micros())
        .bind(updated_at)
        .fetch_one(&mut *tx)
        .await?;

        // Keep the current payload reachable until the new row is durable.
        let exists = fs::try_exists(file_path).await?;
        let backup = match file_path.parent() {
            Some(parent) if exists => {
                let backup = parent.join(format!(".bak-{}", Uuid::new_v4()));
                fs::hard_link(file_path, &backup).await?;
                Some(backup)
            }
            _ => None,
        };

        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if let Some(backup) = &backup {
                let _ = fs::remove_file(backup).await;
            }
            return Err(StoreError::Io(err));
        }

        if let Err(err) = tx.commit().await {
            match &backup {
                Some(backup) => {
                    let _ = fs::rename(backup, file_path).await;
                }
                None => {
                    let _ = fs::remove_file(file_path).await;
                }
            }
            return Err(StoreError::Sqlx(err));
        }

        if let Some(backup) = backup {
            if let Err(err) = fs::remove_file(&backup).await {
                debug!("failed to remove payload backup {}: {}", backup.display(), err);
            }
        }
        Ok(row)
    }

    async fn check_sqlite(&self) -> HealthCheck {
        let (ok, error) = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => (true, None),
            Ok(v) => (false, Some(format!("unexpected result: {}", v))),
            Err(e) => (false, Some(format!("error: {}", e))),
        };
        HealthCheck {
            name: "sqlite",
            ok,
            error,
        }
    }

    async fn check_disk(&self) -> HealthCheck {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let result = async {
            fs::create_dir_all(&self.base_path).await?;
            fs::write(&tmp_path, b"readyz").await?;
            let bytes = fs::read(&tmp_path).await?;
            if bytes != b"readyz" {
                return Err(io::Error::other("file content mismatch"));
            }
            Ok::<(), io::Error>(())
        }
        .await;
        let _ = fs::remove_file(&tmp_path).await;

        HealthCheck {
            name: "disk",
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> StoreResult<ListPage> {
        self.ensure_bucket_name_safe(bucket)?;
        let page_size = page_size.max(1);
        let fetch_limit = page_size + 1;
        let start_after = page_token.map(decode_page_token).transpose()?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT name, content_type, size_bytes, etag, generation, updated_at \
             FROM objects WHERE bucket = ",
        );
        builder.push_bind(bucket);

        // `LIKE` folds ASCII case in SQLite; prefixes must match byte for byte.
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            builder.push(" AND name >= ");
            builder.push_bind(prefix);
            builder.push(" AND substr(name, 1, length(");
            builder.push_bind(prefix);
            builder.push(")) = ");
            builder.push_bind(prefix);
        }

        if let Some(after) = start_after {
            builder.push(" AND name > ");
            builder.push_bind(after);
        }

        builder.push(" ORDER BY name ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<StoredObject> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_page_token = None;
        if rows.len() == fetch_limit {
            rows.truncate(page_size);
            next_page_token = rows.last().map(|last| encode_page_token(&last.name));
        }

        debug!(bucket, count = rows.len(), "listed page");
        Ok(ListPage {
            items: rows.into_iter().map(ObjectMetadata::from).collect(),
            next_page_token,
        })
    }

    async fn metadata(&self, object: &ObjectRef) -> StoreResult<ObjectMetadata> {
        self.ensure_bucket_name_safe(&object.bucket)?;
        self.ensure_name_safe(&object.name)?;
        Ok(self.fetch_object(object).await?.into())
    }

    async fn sign_url(
        &self,
        object: &ObjectRef,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<String> {
        self.signer.sign(object, expires_at)
    }

    async fn read_range(&self, object: &ObjectRef, start: u64, end: u64) -> StoreResult<Bytes> {
        self.ensure_bucket_name_safe(&object.bucket)?;
        self.ensure_name_safe(&object.name)?;
        if end <= start {
            return Ok(Bytes::new());
        }

        let path = self.object_path(object);
        let mut file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::not_found(object)
            } else {
                StoreError::Io(err)
            }
        })?;

        file.seek(SeekFrom::Start(start)).await?;
        let want = end - start;
        let mut buf = Vec::with_capacity(want.min(WRITE_BUFFER_SIZE as u64 * 64) as usize);
        file.take(want).read_to_end(&mut buf).await?;

        debug!(
            bucket = %object.bucket,
            name = %object.name,
            start,
            end,
            read = buf.len(),
            "read range"
        );
        Ok(Bytes::from(buf))
    }

    /// Stream `reader` into a temporary file, then swap it into place while
    /// the metadata upsert is still uncommitted. If the rename or the commit
    /// fails, the previous payload is restored and the temporary file removed.
    async fn write_stream(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        mut reader: ObjectReader<'_>,
    ) -> StoreResult<ObjectMetadata> {
        self.ensure_bucket_name_safe(&object.bucket)?;
        self.ensure_name_safe(&object.name)?;

        let file_path = self.object_path(object);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            let mut size_bytes: i64 = 0;
            let mut digest = Context::new();
            let mut buf = vec![0u8; WRITE_BUFFER_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                size_bytes += n as i64;
                digest.consume(&buf[..n]);
                file.write_all(&buf[..n]).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>((size_bytes, format!("{:x}", digest.compute())))
        }
        .await;

        let (size_bytes, etag) = match written {
            Ok(v) => v,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };

        let _guard = self.lock_object(object).await;
        let result = self
            .commit_payload(object, content_type, size_bytes, &etag, &tmp_path, &file_path)
            .await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        let row = result?;

        debug!(
            bucket = %object.bucket,
            name = %object.name,
            size_bytes,
            etag = %row.etag,
            generation = row.generation,
            "stored object"
        );
        Ok(row.into())
    }

    /// Delete the metadata row and payload, then prune empty shard directories.
    async fn delete(&self, object: &ObjectRef) -> StoreResult<()> {
        self.ensure_bucket_name_safe(&object.bucket)?;
        self.ensure_name_safe(&object.name)?;
        let _guard = self.lock_object(object).await;

        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND name = ?")
            .bind(&object.bucket)
            .bind(&object.name)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(object));
        }

        let file_path = self.object_path(object);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&object.bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }

    async fn health(&self) -> Vec<HealthCheck> {
        vec![self.check_sqlite().await, self.check_disk().await]
    }
}

fn encode_page_token(name: &str) -> String {
    general_purpose::STANDARD.encode(name)
}

fn decode_page_token(token: &str) -> StoreResult<String> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(StoreError::InvalidPageToken)
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
