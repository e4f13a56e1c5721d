//! In-memory `ObjectStore` used by unit tests.
//!
//! Listing can either page over the stored objects or replay a scripted
//! sequence of pages, and every backend call is recorded so tests can assert
//! exact call counts.

use super::{
    ListPage, ObjectMetadata, ObjectReader, ObjectRef, ObjectStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Mutex,
};
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListPage {
        prefix: Option<String>,
        page_token: Option<String>,
        page_size: usize,
    },
    Metadata(String),
    SignUrl(String),
    ReadRange { name: String, start: u64, end: u64 },
    Write(String),
    Delete(String),
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), (ObjectMetadata, Vec<u8>)>>,
    scripted_pages: Mutex<VecDeque<StoreResult<ListPage>>>,
    failing_writes: Mutex<HashSet<String>>,
    failing_signs: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, meta: ObjectMetadata, body: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), meta.name.clone()), (meta, body));
    }

    /// Queue pages returned by `list_page`, in order, ignoring stored objects.
    pub fn script_pages(&self, pages: Vec<StoreResult<ListPage>>) {
        self.scripted_pages.lock().unwrap().extend(pages);
    }

    pub fn fail_writes_to(&self, name: &str) {
        self.failing_writes.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_signing_for(&self, name: &str) {
        self.failing_signs.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn body(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), name.to_string()))
            .map(|(_, body)| body.clone())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> StoreResult<ListPage> {
        self.record(Call::ListPage {
            prefix: prefix.map(str::to_string),
            page_token: page_token.map(str::to_string),
            page_size,
        });

        if let Some(page) = self.scripted_pages.lock().unwrap().pop_front() {
            return page;
        }

        let objects = self.objects.lock().unwrap();
        let mut items: Vec<ObjectMetadata> = objects
            .iter()
            .filter(|((b, name), _)| {
                b == bucket
                    && prefix.is_none_or(|p| name.starts_with(p))
                    && page_token.is_none_or(|after| name.as_str() > after)
            })
            .map(|(_, (meta, _))| meta.clone())
            .take(page_size + 1)
            .collect();

        let mut next_page_token = None;
        if items.len() > page_size {
            items.truncate(page_size);
            next_page_token = items.last().map(|m| m.name.clone());
        }
        Ok(ListPage {
            items,
            next_page_token,
        })
    }

    async fn metadata(&self, object: &ObjectRef) -> StoreResult<ObjectMetadata> {
        self.record(Call::Metadata(object.name.clone()));
        self.objects
            .lock()
            .unwrap()
            .get(&(object.bucket.clone(), object.name.clone()))
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| StoreError::not_found(object))
    }

    async fn sign_url(
        &self,
        object: &ObjectRef,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<String> {
        self.record(Call::SignUrl(object.name.clone()));
        if self.failing_signs.lock().unwrap().contains(&object.name) {
            return Err(StoreError::Signing("scripted failure".into()));
        }
        Ok(format!(
            "signed://{}/{}?expires={}",
            object.bucket,
            object.name,
            expires_at.timestamp()
        ))
    }

    async fn read_range(&self, object: &ObjectRef, start: u64, end: u64) -> StoreResult<Bytes> {
        self.record(Call::ReadRange {
            name: object.name.clone(),
            start,
            end,
        });
        let objects = self.objects.lock().unwrap();
        let (_, body) = objects
            .get(&(object.bucket.clone(), object.name.clone()))
            .ok_or_else(|| StoreError::not_found(object))?;
        let len = body.len() as u64;
        let from = start.min(len) as usize;
        let to = end.min(len) as usize;
        Ok(Bytes::copy_from_slice(&body[from..to.max(from)]))
    }

    async fn write_stream(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        mut reader: ObjectReader<'_>,
    ) -> StoreResult<ObjectMetadata> {
        self.record(Call::Write(object.name.clone()));
        if object.name.is_empty() {
            return Err(StoreError::InvalidName(String::new()));
        }
        if self.failing_writes.lock().unwrap().contains(&object.name) {
            return Err(StoreError::Backend("scripted failure".into()));
        }

        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;

        let key = (object.bucket.clone(), object.name.clone());
        let mut objects = self.objects.lock().unwrap();
        let generation = objects.get(&key).map_or(1, |(m, _)| m.generation + 1);
        let meta = ObjectMetadata {
            name: object.name.clone(),
            generation,
            updated_at: Utc::now(),
            content_type: content_type.map(str::to_string),
            size: body.len() as u64,
        };
        objects.insert(key, (meta.clone(), body));
        Ok(meta)
    }

    async fn delete(&self, object: &ObjectRef) -> StoreResult<()> {
        self.record(Call::Delete(object.name.clone()));
        self.objects
            .lock()
            .unwrap()
            .remove(&(object.bucket.clone(), object.name.clone()))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(object))
    }
}
