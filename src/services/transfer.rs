//! Chunked object transfer.
//!
//! Downloads are served as a sequence of fixed-size ranged reads, one chunk
//! in memory at a time. Uploads hand the inbound part body to the store as a
//! reader, so the gateway never buffers a whole file.

use crate::store::{ObjectMetadata, ObjectRef, ObjectStore, StoreResult};
use bytes::Bytes;
use futures::{Stream, TryStreamExt, stream};
use std::{io, sync::Arc};
use tokio_util::io::StreamReader;
use tracing::{debug, error};

/// 10 MiB, a multiple of the 256 KiB granularity object stores favour.
pub const DEFAULT_CHUNK_SIZE: u64 = 262_144 * 4 * 10;

struct ReadState {
    store: Arc<dyn ObjectStore>,
    object: ObjectRef,
    chunk_size: u64,
    size: u64,
    offset: u64,
    finished: bool,
}

async fn next_range(mut state: ReadState) -> StoreResult<Option<(Bytes, ReadState)>> {
    if state.finished || state.offset >= state.size {
        return Ok(None);
    }

    let start = state.offset;
    let end = start + state.chunk_size;
    let chunk = state.store.read_range(&state.object, start, end).await?;
    debug!(
        "read {} bytes of {} at offset {}",
        chunk.len(),
        state.object.name,
        start
    );

    // a short read means the object ended early
    state.finished = (chunk.len() as u64) < state.chunk_size;
    state.offset = end;
    if chunk.is_empty() {
        return Ok(None);
    }
    Ok(Some((chunk, state)))
}

/// Stream `object` as consecutive `chunk_size` reads starting at byte 0.
///
/// Reading stops at the first short chunk or once `size` bytes have been
/// requested, so an object of `S` bytes costs `ceil(S / chunk_size)` reads.
pub fn chunked_reads(
    store: Arc<dyn ObjectStore>,
    object: ObjectRef,
    size: u64,
    chunk_size: u64,
) -> impl Stream<Item = StoreResult<Bytes>> + Send + 'static {
    let name = object.name.clone();
    let state = ReadState {
        store,
        object,
        chunk_size: chunk_size.max(1),
        size,
        offset: 0,
        finished: false,
    };
    stream::try_unfold(state, next_range).inspect_err(move |err| {
        error!("download of {} aborted mid-stream: {}", name, err);
    })
}

/// Look up `object` and return its metadata together with a chunked body.
///
/// A missing object fails here, before any bytes are produced.
pub async fn open_download(
    store: Arc<dyn ObjectStore>,
    object: ObjectRef,
    chunk_size: u64,
) -> StoreResult<(
    ObjectMetadata,
    impl Stream<Item = StoreResult<Bytes>> + Send + 'static,
)> {
    let meta = store.metadata(&object).await?;
    let body = chunked_reads(store, object, meta.size, chunk_size);
    Ok((meta, body))
}

/// Target name for an uploaded file: `{local_path}/{filename}` when a
/// non-empty `local_path` is given, else `{filename}`.
pub fn upload_name(local_path: Option<&str>, filename: &str) -> String {
    match local_path.map(|p| p.trim_end_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, filename),
        _ => filename.to_string(),
    }
}

/// Write one inbound body straight through to the store.
pub async fn upload_stream<S, E>(
    store: &dyn ObjectStore,
    object: &ObjectRef,
    content_type: Option<&str>,
    body: S,
) -> StoreResult<ObjectMetadata>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let reader = StreamReader::new(body.map_err(io::Error::other));
    store
        .write_stream(object, content_type, Box::pin(reader))
        .await
}
