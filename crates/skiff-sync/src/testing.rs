//! Scripted store and fake key generator for unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use skiff_store::{
    LabelSelector, RawWatchEvent, RawWatchStream, ResourceKind, ResourceStore, Secret, StoreError,
    StoreResult, WatchEventType,
};

use crate::error::SyncResult;
use crate::keygen::KeyGenerator;

/// Answers `get`, `create` and `watch` from queued scripts and records
/// the resourceVersion each watch was opened with.
#[derive(Default)]
pub(crate) struct Scripted {
    gets: Mutex<VecDeque<StoreResult<Value>>>,
    creates: Mutex<VecDeque<StoreResult<Value>>>,
    watches: Mutex<VecDeque<Vec<StoreResult<RawWatchEvent>>>>,
    watch_versions: Mutex<Vec<Option<String>>>,
    ping_error: Option<fn() -> StoreError>,
    create_calls: AtomicUsize,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_returns(self, result: StoreResult<Secret>) -> Self {
        self.gets
            .lock()
            .unwrap()
            .push_back(result.map(|s| serde_json::to_value(s).unwrap()));
        self
    }

    pub fn create_returns(self, result: StoreResult<Secret>) -> Self {
        self.creates
            .lock()
            .unwrap()
            .push_back(result.map(|s| serde_json::to_value(s).unwrap()));
        self
    }

    /// Queue one watch session. Once its items are delivered the stream
    /// stays open without further events.
    pub fn watch_returns(self, items: Vec<StoreResult<RawWatchEvent>>) -> Self {
        self.watches.lock().unwrap().push_back(items);
        self
    }

    pub fn ping_fails_with(mut self, error: fn() -> StoreError) -> Self {
        self.ping_error = Some(error);
        self
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn watch_versions(&self) -> Vec<Option<String>> {
        self.watch_versions.lock().unwrap().clone()
    }
}

pub(crate) fn event(event_type: WatchEventType, secret: &Secret) -> RawWatchEvent {
    RawWatchEvent {
        event_type,
        object: serde_json::to_value(secret).unwrap(),
    }
}

#[async_trait]
impl ResourceStore for Scripted {
    fn namespace(&self) -> &str {
        "skiff"
    }

    async fn ping(&self) -> StoreResult<()> {
        match self.ping_error {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }

    async fn get(&self, _kind: ResourceKind, name: &str) -> StoreResult<Value> {
        self.gets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StoreError::not_found(format!("{name} not found"))))
    }

    async fn list(&self, _kind: ResourceKind, _selector: &LabelSelector) -> StoreResult<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn create(&self, _kind: ResourceKind, object: Value) -> StoreResult<Value> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.creates.lock().unwrap().pop_front().unwrap_or(Ok(object))
    }

    async fn replace(&self, _kind: ResourceKind, _name: &str, _object: Value) -> StoreResult<Value> {
        Err(StoreError::server("replace not scripted"))
    }

    async fn patch(&self, _kind: ResourceKind, _name: &str, _patch: Value) -> StoreResult<Value> {
        Err(StoreError::server("patch not scripted"))
    }

    async fn delete(&self, _kind: ResourceKind, _name: &str) -> StoreResult<()> {
        Err(StoreError::server("delete not scripted"))
    }

    async fn watch(
        &self,
        _kind: ResourceKind,
        _selector: &LabelSelector,
        resource_version: Option<&str>,
    ) -> StoreResult<RawWatchStream> {
        self.watch_versions
            .lock()
            .unwrap()
            .push(resource_version.map(str::to_string));
        let items = self.watches.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::pin(
            futures_util::stream::iter(items).chain(futures_util::stream::pending()),
        ))
    }
}

/// Writes `{tag}-{algorithm}` as the "key".
#[derive(Clone)]
pub(crate) struct FakeKeygen {
    tag: String,
    calls: Arc<AtomicUsize>,
}

impl FakeKeygen {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyGenerator for FakeKeygen {
    async fn generate(&self, algorithm: &str, path: &Path) -> SyncResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}-{algorithm}", self.tag).into_bytes();
        std::fs::write(path, &key).unwrap();
        std::fs::write(crate::host_keys::public_path(path), b"public").unwrap();
        Ok(key)
    }
}
