//! The `ResourceStore` trait and its typed facade.

use std::marker::PhantomData;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::local::LocalStore;
use crate::rest::HttpStore;
use crate::selector::LabelSelector;
use crate::types::{RawWatchEvent, Resource, ResourceKind, WatchEvent};

/// Untyped watch events, in store order.
pub type RawWatchStream = Pin<Box<dyn Stream<Item = StoreResult<RawWatchEvent>> + Send>>;

/// Typed watch events for one resource kind.
pub type WatchStream<R> = Pin<Box<dyn Stream<Item = StoreResult<WatchEvent<R>>> + Send>>;

/// Lines of text, such as a container log.
pub type LineStream = Pin<Box<dyn Stream<Item = StoreResult<String>> + Send>>;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Revisions of change history a local store keeps for watches.
pub const DEFAULT_EVENT_RETENTION: u64 = 1000;

/// Where a store lives and which namespace a handle operates in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// `http://host:port` for the cluster API or `file:///path` for a
    /// local store.
    pub api_root: String,
    pub namespace: String,
    /// Upper bound on one non-streaming request, response body included.
    pub request_timeout: Duration,
    pub event_retention: u64,
}

impl StoreConfig {
    pub fn new(api_root: &str, namespace: &str) -> Self {
        Self {
            api_root: api_root.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_retention: DEFAULT_EVENT_RETENTION,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_event_retention(mut self, revisions: u64) -> Self {
        self.event_retention = revisions;
        self
    }
}

/// Which part of a pod's log to read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Container to read; the pod's only container when unset.
    pub container: Option<String>,
    /// Start this many lines before the end.
    pub tail_lines: Option<u32>,
    /// Keep the stream open for new lines.
    pub follow: bool,
}

/// Namespaced CRUD + watch over untyped JSON objects.
///
/// Implementations must make `create` atomic (an existing name is a
/// `Conflict`), reject a `replace` whose `metadata.resourceVersion` is
/// stale with `Conflict`, and assign a fresh resourceVersion on every
/// write.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    fn namespace(&self) -> &str;

    /// Succeeds once the store answers at all.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, kind: ResourceKind, name: &str) -> StoreResult<Value>;

    async fn list(&self, kind: ResourceKind, selector: &LabelSelector) -> StoreResult<Vec<Value>>;

    async fn create(&self, kind: ResourceKind, object: Value) -> StoreResult<Value>;

    async fn replace(&self, kind: ResourceKind, name: &str, object: Value) -> StoreResult<Value>;

    /// Apply a JSON merge patch.
    async fn patch(&self, kind: ResourceKind, name: &str, patch: Value) -> StoreResult<Value>;

    async fn delete(&self, kind: ResourceKind, name: &str) -> StoreResult<()>;

    /// Stream changes after `resource_version`; without one, current
    /// matches are delivered first as `ADDED`.
    async fn watch(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
        resource_version: Option<&str>,
    ) -> StoreResult<RawWatchStream>;

    /// A pod's container log, one line per item. Only stores backed by a
    /// running cluster have logs to serve.
    async fn pod_logs(&self, name: &str, _options: &LogOptions) -> StoreResult<LineStream> {
        Err(StoreError::invalid(format!(
            "pod `{name}`: this store keeps no container logs"
        )))
    }
}

/// Open a store handle for the configured backend.
pub fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn ResourceStore>> {
    if let Some(path) = config.api_root.strip_prefix("file://") {
        debug!(%path, namespace = %config.namespace, "using local store");
        let store = LocalStore::open(Path::new(path), &config.namespace)?
            .with_retention(config.event_retention);
        return Ok(Arc::new(store));
    }
    if config.api_root.starts_with("http://") {
        debug!(api_root = %config.api_root, namespace = %config.namespace, "using cluster API");
        return Ok(Arc::new(HttpStore::new(config.clone())));
    }
    Err(StoreError::invalid(format!(
        "unsupported api root `{}`: expected http:// (e.g. kubectl proxy) or file://",
        config.api_root
    )))
}

/// Typed view of one resource kind in a store.
pub struct Api<'a, R> {
    store: &'a dyn ResourceStore,
    _marker: PhantomData<fn() -> R>,
}

impl<'a, R: Resource> Api<'a, R> {
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub async fn get(&self, name: &str) -> StoreResult<R> {
        decode(self.store.get(R::KIND, name).await?)
    }

    pub async fn list(&self, selector: &LabelSelector) -> StoreResult<Vec<R>> {
        self.store
            .list(R::KIND, selector)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn create(&self, object: &R) -> StoreResult<R> {
        decode(self.store.create(R::KIND, encode(object)?).await?)
    }

    /// Replace by the object's own name; its resourceVersion, if set,
    /// is the optimistic-concurrency precondition.
    pub async fn replace(&self, object: &R) -> StoreResult<R> {
        let name = object.name().to_string();
        decode(self.store.replace(R::KIND, &name, encode(object)?).await?)
    }

    pub async fn patch(&self, name: &str, patch: Value) -> StoreResult<R> {
        decode(self.store.patch(R::KIND, name, patch).await?)
    }

    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        self.store.delete(R::KIND, name).await
    }

    pub async fn watch(
        &self,
        selector: &LabelSelector,
        resource_version: Option<&str>,
    ) -> StoreResult<WatchStream<R>> {
        let raw = self.store.watch(R::KIND, selector, resource_version).await?;
        Ok(Box::pin(
            raw.map(|item| item.and_then(WatchEvent::<R>::from_raw)),
        ))
    }
}

/// Serialize a typed object, stamping `apiVersion` and `kind`.
fn encode<R: Resource>(object: &R) -> StoreResult<Value> {
    let mut value =
        serde_json::to_value(object).map_err(|e| StoreError::decode(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.insert("apiVersion".to_string(), Value::from("v1"));
        map.insert("kind".to_string(), Value::from(R::KIND.kind_name()));
    }
    Ok(value)
}

fn decode<R: Resource>(value: Value) -> StoreResult<R> {
    serde_json::from_value(value).map_err(|e| StoreError::decode(e.to_string()))
}
