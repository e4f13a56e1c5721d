//! Streaming listing pipeline.
//!
//! Pages through a bucket, filters each object, optionally signs a download
//! URL for it, and emits the survivors as an incrementally serialized JSON
//! array. The body is a pull-driven stream: nothing is fetched or signed
//! until the HTTP transport asks for the next chunk, and dropping the stream
//! (client disconnect) stops all further backend calls.

use crate::{
    models::entity::Entity,
    store::{ObjectMetadata, ObjectRef, ObjectStore, StoreResult},
};
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Utc};
use futures::{Stream, TryStreamExt, stream};
use std::{io, sync::Arc};
use tracing::{debug, error, info};

/// Per-request listing filter, built once from query parameters.
#[derive(Debug, Clone)]
pub struct ListingFilter {
    pub prefix: Option<String>,
    pub include_subfolders: bool,
    pub since_floor: Option<DateTime<FixedOffset>>,
    pub skip_signing: bool,
    pub signed_url_expiry: DateTime<Utc>,
}

impl ListingFilter {
    /// Whether `meta` belongs in the output.
    ///
    /// Objects updated before `since_floor` are dropped (equal passes), names
    /// with a `/` are dropped unless subfolders are included, and directory
    /// placeholders (names ending in `/`) are always dropped.
    pub fn admits(&self, meta: &ObjectMetadata) -> bool {
        if let Some(floor) = self.since_floor {
            if meta.updated_at < floor.with_timezone(&Utc) {
                return false;
            }
        }
        if meta.name.contains('/') && !self.include_subfolders {
            return false;
        }
        if meta.name.ends_with('/') {
            debug!("skipping folder object {}", meta.name);
            return false;
        }
        true
    }
}

/// Paging behaviour shared by all listing requests.
#[derive(Debug, Clone, Copy)]
pub struct ListingOptions {
    pub page_size: usize,
    /// Also stop as soon as a page comes back shorter than `page_size`.
    pub short_page_stop: bool,
}

/// Where the listing stands after consuming a page.
#[derive(Debug, Clone, Default)]
pub struct PageCursor {
    pub token: Option<String>,
    /// Items on the page just fetched.
    pub count: usize,
}

impl PageCursor {
    pub fn has_more(&self, options: &ListingOptions) -> bool {
        if self.token.is_none() {
            return false;
        }
        !(options.short_page_stop && self.count < options.page_size)
    }
}

enum Phase {
    Open,
    Streaming,
    Done,
}

struct ListingState {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    filter: ListingFilter,
    options: ListingOptions,
    cursor: PageCursor,
    items: std::vec::IntoIter<ObjectMetadata>,
    phase: Phase,
    emitted: usize,
}

impl ListingState {
    async fn fetch_page(&mut self) -> StoreResult<()> {
        let page = self
            .store
            .list_page(
                &self.bucket,
                self.filter.prefix.as_deref(),
                self.cursor.token.as_deref(),
                self.options.page_size,
            )
            .await?;
        self.cursor = PageCursor {
            count: page.count(),
            token: page.next_page_token,
        };
        self.items = page.items.into_iter();
        Ok(())
    }

    async fn entity(&self, meta: &ObjectMetadata) -> StoreResult<Entity> {
        let file_url = if self.filter.skip_signing {
            None
        } else {
            let object = ObjectRef::new(self.bucket.clone(), meta.name.clone());
            Some(
                self.store
                    .sign_url(&object, self.filter.signed_url_expiry)
                    .await?,
            )
        };
        Ok(Entity::from_metadata(meta, file_url))
    }

    fn encode(&self, entity: &Entity) -> StoreResult<Bytes> {
        let mut buf = Vec::with_capacity(256);
        if self.emitted > 0 {
            buf.push(b',');
        }
        serde_json::to_writer(&mut buf, entity).map_err(io::Error::from)?;
        Ok(Bytes::from(buf))
    }
}

/// Produce the next body chunk: `[`, one entity, or `]`.
async fn next_chunk(mut state: ListingState) -> StoreResult<Option<(Bytes, ListingState)>> {
    match state.phase {
        Phase::Open => {
            state.phase = Phase::Streaming;
            return Ok(Some((Bytes::from_static(b"["), state)));
        }
        Phase::Done => return Ok(None),
        Phase::Streaming => {}
    }

    loop {
        while let Some(meta) = state.items.next() {
            if !state.filter.admits(&meta) {
                continue;
            }
            let entity = state.entity(&meta).await?;
            let chunk = state.encode(&entity)?;
            state.emitted += 1;
            return Ok(Some((chunk, state)));
        }

        info!("batch of {} items successfully processed", state.cursor.count);
        if !state.cursor.has_more(&state.options) {
            break;
        }
        state.fetch_page().await?;
    }

    state.phase = Phase::Done;
    info!("{} elements processed", state.emitted);
    Ok(Some((Bytes::from_static(b"]"), state)))
}

/// Start a listing of `bucket`.
///
/// The first page is fetched before this returns, so backend failures at
/// that point surface as an error the caller can still turn into a status
/// code. Failures on later pages or while signing end the stream with an
/// error.
pub async fn open_listing(
    store: Arc<dyn ObjectStore>,
    bucket: String,
    filter: ListingFilter,
    options: ListingOptions,
) -> StoreResult<impl Stream<Item = StoreResult<Bytes>> + Send + 'static> {
    let mut state = ListingState {
        store,
        bucket,
        filter,
        options,
        cursor: PageCursor::default(),
        items: Vec::new().into_iter(),
        phase: Phase::Open,
        emitted: 0,
    };
    state.fetch_page().await?;

    let bucket = state.bucket.clone();
    Ok(stream::try_unfold(state, next_chunk).inspect_err(move |err| {
        error!("listing of bucket {} aborted mid-stream: {}", bucket, err);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::{
            ListPage, StoreError,
            memory::{Call, MemoryStore},
        },
        timestamp::{default_expiry, parse_since},
    };
    use chrono::TimeZone;
    use futures::StreamExt;

    const PATTERN: &str = "%Y-%m-%d %H:%M:%S%.f%z";

    fn filter() -> ListingFilter {
        ListingFilter {
            prefix: None,
            include_subfolders: false,
            since_floor: None,
            skip_signing: false,
            signed_url_expiry: default_expiry(),
        }
    }

    fn options(page_size: usize) -> ListingOptions {
        ListingOptions {
            page_size,
            short_page_stop: false,
        }
    }

    fn meta(name: &str, updated_at: DateTime<Utc>, generation: i64) -> ObjectMetadata {
        ObjectMetadata {
            name: name.to_string(),
            generation,
            updated_at,
            content_type: None,
            size: 0,
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn page(names: &[&str], token: Option<&str>) -> StoreResult<ListPage> {
        Ok(ListPage {
            items: names.iter().map(|n| meta(n, day(1), 1)).collect(),
            next_page_token: token.map(str::to_string),
        })
    }

    async fn collect(
        store: Arc<MemoryStore>,
        filter: ListingFilter,
        options: ListingOptions,
    ) -> serde_json::Value {
        let body = open_listing(store, "b1".into(), filter, options)
            .await
            .unwrap()
            .try_collect::<Vec<Bytes>>()
            .await
            .unwrap()
            .concat();
        serde_json::from_slice(&body).unwrap()
    }

    fn list_calls(store: &MemoryStore) -> usize {
        store.count_calls(|c| matches!(c, Call::ListPage { .. }))
    }

    #[tokio::test]
    async fn empty_bucket_yields_empty_array() {
        let store = Arc::new(MemoryStore::new());
        let body = open_listing(store, "b1".into(), filter(), options(10))
            .await
            .unwrap()
            .try_collect::<Vec<Bytes>>()
            .await
            .unwrap()
            .concat();
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn one_and_many_entities_are_valid_json() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b1", meta("a", day(1), 1), vec![]);
        let one = collect(store.clone(), filter(), options(10)).await;
        assert_eq!(one.as_array().unwrap().len(), 1);

        for name in ["b", "c", "d"] {
            store.insert("b1", meta(name, day(1), 1), vec![]);
        }
        let many = collect(store, filter(), options(2)).await;
        let ids: Vec<_> = many
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn since_floor_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b1", meta("early", day(1), 1), vec![]);
        store.insert("b1", meta("equal", day(2), 1), vec![]);
        store.insert("b1", meta("later", day(3), 1), vec![]);

        let mut f = filter();
        f.since_floor = Some(day(2).fixed_offset());
        let out = collect(store, f, options(10)).await;
        let ids: Vec<_> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["equal", "later"]);
    }

    #[tokio::test]
    async fn subfolders_and_placeholders() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b1", meta("root.txt", day(1), 1), vec![]);
        store.insert("b1", meta("dir/", day(1), 1), vec![]);
        store.insert("b1", meta("dir/nested.txt", day(1), 1), vec![]);

        let ids = |v: serde_json::Value| -> Vec<String> {
            v.as_array()
                .unwrap()
                .iter()
                .map(|e| e["_id"].as_str().unwrap().to_string())
                .collect()
        };

        let flat = collect(store.clone(), filter(), options(10)).await;
        assert_eq!(ids(flat), vec!["root.txt"]);

        let mut f = filter();
        f.include_subfolders = true;
        let deep = collect(store, f, options(10)).await;
        assert_eq!(ids(deep), vec!["dir/nested.txt", "root.txt"]);
    }

    #[tokio::test]
    async fn stops_after_last_token_with_full_full_short_pages() {
        let store = Arc::new(MemoryStore::new());
        store.script_pages(vec![
            page(&["a", "b"], Some("t1")),
            page(&["c", "d"], Some("t2")),
            page(&["e"], None),
        ]);

        let out = collect(store.clone(), filter(), options(2)).await;

        assert_eq!(out.as_array().unwrap().len(), 5);
        assert_eq!(list_calls(&store), 3);
        let tokens: Vec<_> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ListPage { page_token, .. } => Some(page_token),
                _ => None,
            })
            .collect();
        assert_eq!(
            tokens,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn short_page_with_token_keeps_paging_by_default() {
        let store = Arc::new(MemoryStore::new());
        store.script_pages(vec![
            page(&["a", "b"], Some("t1")),
            page(&["c"], Some("t2")),
            page(&[], None),
        ]);

        let out = collect(store.clone(), filter(), options(2)).await;

        assert_eq!(out.as_array().unwrap().len(), 3);
        assert_eq!(list_calls(&store), 3);
    }

    #[tokio::test]
    async fn legacy_short_page_stop_ends_early() {
        let store = Arc::new(MemoryStore::new());
        store.script_pages(vec![
            page(&["a", "b"], Some("t1")),
            page(&["c", "d"], Some("t2")),
            page(&["e"], Some("t3")),
            page(&["never"], None),
        ]);

        let opts = ListingOptions {
            page_size: 2,
            short_page_stop: true,
        };
        let out = collect(store.clone(), filter(), opts).await;

        assert_eq!(out.as_array().unwrap().len(), 5);
        assert_eq!(list_calls(&store), 3);
    }

    #[tokio::test]
    async fn do_not_sign_skips_signing() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b1", meta("a", day(1), 1), vec![]);

        let mut f = filter();
        f.skip_signing = true;
        let out = collect(store.clone(), f, options(10)).await;

        assert!(out[0].get("file_url").is_none());
        assert_eq!(store.count_calls(|c| matches!(c, Call::SignUrl(_))), 0);
    }

    #[tokio::test]
    async fn signs_with_requested_expiry() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b1", meta("a", day(1), 1), vec![]);

        let mut f = filter();
        f.signed_url_expiry = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let expected = format!("signed://b1/a?expires={}", f.signed_url_expiry.timestamp());
        let out = collect(store, f, options(10)).await;

        assert_eq!(out[0]["file_url"], expected.as_str());
    }

    #[tokio::test]
    async fn first_page_failure_is_returned_before_streaming() {
        let store = Arc::new(MemoryStore::new());
        store.script_pages(vec![Err(StoreError::Backend("down".into()))]);

        let result = open_listing(store, "b1".into(), filter(), options(10)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn later_failure_terminates_stream_with_error() {
        let store = Arc::new(MemoryStore::new());
        store.script_pages(vec![
            page(&["a"], Some("t1")),
            Err(StoreError::Backend("down".into())),
        ]);

        let chunks: Vec<_> = open_listing(store, "b1".into(), filter(), options(1))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(&chunks[0].as_ref().unwrap()[..], b"[");
        assert!(chunks[1].is_ok());
        assert!(chunks.last().unwrap().is_err());
    }

    #[tokio::test]
    async fn signing_failure_terminates_stream() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b1", meta("a", day(1), 1), vec![]);
        store.fail_signing_for("a");

        let result = open_listing(store, "b1".into(), filter(), options(10))
            .await
            .unwrap()
            .try_collect::<Vec<Bytes>>()
            .await;
        assert!(matches!(result, Err(StoreError::Signing(_))));
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_backend_calls() {
        let store = Arc::new(MemoryStore::new());
        store.script_pages(vec![
            page(&["a", "b"], Some("t1")),
            page(&["c", "d"], None),
        ]);

        let mut body = Box::pin(
            open_listing(store.clone(), "b1".into(), filter(), options(2))
                .await
                .unwrap(),
        );
        body.next().await.unwrap().unwrap();
        body.next().await.unwrap().unwrap();
        drop(body);

        assert_eq!(list_calls(&store), 1);
        assert_eq!(store.count_calls(|c| matches!(c, Call::SignUrl(_))), 1);
    }

    #[tokio::test]
    async fn prefix_and_since_example() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b1", meta("images/a.jpg", day(2), 5), vec![]);
        store.insert(
            "b1",
            meta(
                "images/sub/b.jpg",
                Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap(),
                3,
            ),
            vec![],
        );
        store.insert("b1", meta("other.txt", day(3), 1), vec![]);

        let f = ListingFilter {
            prefix: Some("images".into()),
            include_subfolders: true,
            since_floor: parse_since("2024-01-01 00:00:00.000000 02:00", PATTERN),
            skip_signing: false,
            signed_url_expiry: default_expiry(),
        };
        let out = collect(store.clone(), f, options(10)).await;

        let entities = out.as_array().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["_id"], "images/a.jpg");
        assert_eq!(entities[0]["file_id"], "images/a.jpg");
        assert_eq!(entities[0]["generation"], 5);
        assert_eq!(entities[0]["updated"], "2024-01-02 00:00:00+00:00");
        assert_eq!(entities[0]["_updated"], entities[0]["updated"]);
        assert!(entities[0]["file_url"].as_str().is_some());
        assert_eq!(
            store.calls()[0],
            Call::ListPage {
                prefix: Some("images".into()),
                page_token: None,
                page_size: 10,
            }
        );
    }
}
