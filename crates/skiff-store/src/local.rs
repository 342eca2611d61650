//! LocalStore: redb-backed resource store.
//!
//! Mirrors the cluster API semantics skiff depends on: create is atomic
//! and fails with `Conflict` on an existing name, replace is checked
//! against the caller's resourceVersion, every write bumps a store-wide
//! revision, and watches replay the event log from any retained revision
//! before blocking for new writes. The log keeps the last `retention`
//! revisions; a watch from an older one fails with `Expired`, like a
//! compacted cluster. Backed by a file or by redb's in-memory backend
//! (for tests).
//!
//! A redb file is locked by the process that opens it; the local store
//! serves one process at a time.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

use crate::client::{DEFAULT_EVENT_RETENTION, RawWatchStream, ResourceStore};
use crate::error::{ErrorKind, StoreError, StoreResult};
use crate::merge::merge_patch;
use crate::selector::LabelSelector;
use crate::tables::*;
use crate::types::{Labels, RawWatchEvent, ResourceKind, WatchEventType};

/// Convert any `Display` error from redb into a server-side store error.
macro_rules! db_err {
    () => {
        |e| StoreError::server(format!("local store: {e}"))
    };
}

/// Event log entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEvent {
    namespace: String,
    kind: ResourceKind,
    #[serde(rename = "type")]
    event_type: WatchEventType,
    object: Value,
}

/// What a write does to the object under its key.
enum Change {
    Put(Value, WatchEventType),
    Remove(Value),
}

/// Thread-safe resource store backed by redb, scoped to one namespace.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
    namespace: String,
    /// Latest committed revision; watchers wait on changes to it.
    revision: Arc<watch::Sender<u64>>,
    /// Revisions of history kept in the event log.
    retention: u64,
}

impl LocalStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path, namespace: &str) -> StoreResult<Self> {
        let db = Database::create(path).map_err(db_err!())?;
        debug!(?path, "local store opened");
        Self::from_database(db, namespace)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(namespace: &str) -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(db_err!())?;
        debug!("in-memory local store opened");
        Self::from_database(db, namespace)
    }

    fn from_database(db: Database, namespace: &str) -> StoreResult<Self> {
        let txn = db.begin_write().map_err(db_err!())?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OBJECTS).map_err(db_err!())?;
        txn.open_table(EVENTS).map_err(db_err!())?;
        txn.open_table(META).map_err(db_err!())?;
        txn.commit().map_err(db_err!())?;

        let store = Self {
            db: Arc::new(db),
            namespace: namespace.to_string(),
            revision: Arc::new(watch::channel(0).0),
            retention: DEFAULT_EVENT_RETENTION,
        };
        let current = store.current_revision()?;
        store.revision.send_replace(current);
        Ok(store)
    }

    /// Another handle on the same database, scoped to `namespace`.
    pub fn namespaced(&self, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..self.clone()
        }
    }

    /// Keep at least `revisions` events (minimum one) for watches to
    /// resume from.
    pub fn with_retention(mut self, revisions: u64) -> Self {
        self.retention = revisions.max(1);
        self
    }

    /// Latest committed revision.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn current_revision(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let meta = txn.open_table(META).map_err(db_err!())?;
        Ok(meta
            .get(REVISION_KEY)
            .map_err(db_err!())?
            .map(|g| g.value())
            .unwrap_or(0))
    }

    fn key(&self, kind: ResourceKind, name: &str) -> String {
        object_key(&self.namespace, kind.path(), name)
    }

    /// Run one write transaction against `kind/name`.
    ///
    /// `apply` sees the current object, if any, and decides the change;
    /// returning an error aborts the transaction untouched.
    fn write(
        &self,
        kind: ResourceKind,
        name: &str,
        apply: impl FnOnce(Option<Value>) -> StoreResult<Change>,
    ) -> StoreResult<Value> {
        let txn = self.db.begin_write().map_err(db_err!())?;
        match self.apply_write(&txn, kind, name, apply) {
            Ok((object, rev)) => {
                txn.commit().map_err(db_err!())?;
                self.revision.send_if_modified(|current| {
                    if rev > *current {
                        *current = rev;
                        true
                    } else {
                        false
                    }
                });
                Ok(object)
            }
            Err(e) => {
                let _ = txn.abort();
                Err(e)
            }
        }
    }

    fn apply_write(
        &self,
        txn: &WriteTransaction,
        kind: ResourceKind,
        name: &str,
        apply: impl FnOnce(Option<Value>) -> StoreResult<Change>,
    ) -> StoreResult<(Value, u64)> {
        let key = self.key(kind, name);
        let mut objects = txn.open_table(OBJECTS).map_err(db_err!())?;
        let mut events = txn.open_table(EVENTS).map_err(db_err!())?;
        let mut meta = txn.open_table(META).map_err(db_err!())?;

        let current = match objects.get(key.as_str()).map_err(db_err!())? {
            Some(guard) => Some(parse(guard.value())?),
            None => None,
        };

        let rev = meta
            .get(REVISION_KEY)
            .map_err(db_err!())?
            .map(|g| g.value())
            .unwrap_or(0)
            + 1;

        let (object, event_type) = match apply(current)? {
            Change::Put(mut object, event_type) => {
                stamp(&mut object, &self.namespace, rev);
                let bytes = serde_json::to_vec(&object).map_err(decode_err)?;
                objects
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(db_err!())?;
                (object, event_type)
            }
            Change::Remove(mut object) => {
                stamp(&mut object, &self.namespace, rev);
                objects.remove(key.as_str()).map_err(db_err!())?;
                (object, WatchEventType::Deleted)
            }
        };

        let event = StoredEvent {
            namespace: self.namespace.clone(),
            kind,
            event_type,
            object: object.clone(),
        };
        let event_bytes = serde_json::to_vec(&event).map_err(decode_err)?;
        events
            .insert(rev, event_bytes.as_slice())
            .map_err(db_err!())?;
        meta.insert(REVISION_KEY, rev).map_err(db_err!())?;

        // One event in, one event out once the log is full.
        if rev > self.retention {
            let dropped = rev - self.retention;
            events.remove(dropped).map_err(db_err!())?;
            let compacted = meta
                .get(COMPACTED_KEY)
                .map_err(db_err!())?
                .map(|g| g.value())
                .unwrap_or(0);
            if dropped > compacted {
                meta.insert(COMPACTED_KEY, dropped).map_err(db_err!())?;
            }
        }

        debug!(%key, rev, ?event_type, "object written");
        Ok((object, rev))
    }

    /// Current matches as synthetic `ADDED` events, plus the revision
    /// they were read at.
    fn snapshot(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
    ) -> StoreResult<(u64, VecDeque<RawWatchEvent>)> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let meta = txn.open_table(META).map_err(db_err!())?;
        let rev = meta
            .get(REVISION_KEY)
            .map_err(db_err!())?
            .map(|g| g.value())
            .unwrap_or(0);
        let objects = txn.open_table(OBJECTS).map_err(db_err!())?;
        let prefix = kind_prefix(&self.namespace, kind.path());

        let mut pending = VecDeque::new();
        for entry in objects.iter().map_err(db_err!())? {
            let (key, value) = entry.map_err(db_err!())?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let object = parse(value.value())?;
            if selector.matches(&labels_of(&object)) {
                pending.push_back(RawWatchEvent {
                    event_type: WatchEventType::Added,
                    object,
                });
            }
        }
        Ok((rev, pending))
    }

    /// Matching events with revision greater than `after`, plus the last
    /// revision scanned. Fails with `Expired` once events after `after`
    /// have been compacted away.
    fn events_after(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
        after: u64,
    ) -> StoreResult<(Vec<RawWatchEvent>, u64)> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let meta = txn.open_table(META).map_err(db_err!())?;
        let compacted = meta
            .get(COMPACTED_KEY)
            .map_err(db_err!())?
            .map(|g| g.value())
            .unwrap_or(0);
        if after < compacted {
            return Err(expired(after, compacted));
        }

        let table = txn.open_table(EVENTS).map_err(db_err!())?;
        let mut last = after;
        let mut results = Vec::new();
        for entry in table.range((after + 1)..).map_err(db_err!())? {
            let (rev, value) = entry.map_err(db_err!())?;
            last = rev.value();
            let event: StoredEvent =
                serde_json::from_slice(value.value()).map_err(decode_err)?;
            if event.namespace == self.namespace
                && event.kind == kind
                && selector.matches(&labels_of(&event.object))
            {
                results.push(RawWatchEvent {
                    event_type: event.event_type,
                    object: event.object,
                });
            }
        }
        Ok((results, last))
    }

    fn compacted_revision(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let meta = txn.open_table(META).map_err(db_err!())?;
        Ok(meta
            .get(COMPACTED_KEY)
            .map_err(db_err!())?
            .map(|g| g.value())
            .unwrap_or(0))
    }
}

/// Watch position over the event log.
struct Cursor {
    store: LocalStore,
    kind: ResourceKind,
    selector: LabelSelector,
    after: u64,
    pending: VecDeque<RawWatchEvent>,
    changes: watch::Receiver<u64>,
}

#[async_trait]
impl ResourceStore for LocalStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> StoreResult<Value> {
        let key = self.key(kind, name);
        let txn = self.db.begin_read().map_err(db_err!())?;
        let table = txn.open_table(OBJECTS).map_err(db_err!())?;
        match table.get(key.as_str()).map_err(db_err!())? {
            Some(guard) => parse(guard.value()),
            None => Err(not_found(kind, name)),
        }
    }

    async fn list(&self, kind: ResourceKind, selector: &LabelSelector) -> StoreResult<Vec<Value>> {
        let prefix = kind_prefix(&self.namespace, kind.path());
        let txn = self.db.begin_read().map_err(db_err!())?;
        let table = txn.open_table(OBJECTS).map_err(db_err!())?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(db_err!())? {
            let (key, value) = entry.map_err(db_err!())?;
            if key.value().starts_with(&prefix) {
                let object = parse(value.value())?;
                if selector.matches(&labels_of(&object)) {
                    results.push(object);
                }
            }
        }
        Ok(results)
    }

    async fn create(&self, kind: ResourceKind, object: Value) -> StoreResult<Value> {
        let name = name_of(&object)
            .ok_or_else(|| StoreError::invalid("metadata.name is required"))?;
        self.write(kind, &name, |current| {
            if current.is_some() {
                return Err(StoreError::conflict(format!(
                    "{} \"{}\" already exists",
                    kind.path(),
                    name
                )));
            }
            Ok(Change::Put(object, WatchEventType::Added))
        })
    }

    async fn replace(&self, kind: ResourceKind, name: &str, mut object: Value) -> StoreResult<Value> {
        match name_of(&object) {
            Some(body_name) if body_name != name => {
                return Err(StoreError::invalid(format!(
                    "name `{body_name}` in body does not match `{name}`"
                )));
            }
            Some(_) => {}
            None => set_meta(&mut object, "name", Value::from(name)),
        }
        self.write(kind, name, |current| {
            let current = current.ok_or_else(|| not_found(kind, name))?;
            let expected = version_of(&object);
            if expected.is_some() && expected != version_of(&current) {
                return Err(StoreError::conflict(format!(
                    "{} \"{}\" was modified; resourceVersion {} is stale",
                    kind.path(),
                    name,
                    expected.unwrap_or_default()
                )));
            }
            Ok(Change::Put(object, WatchEventType::Modified))
        })
    }

    async fn patch(&self, kind: ResourceKind, name: &str, patch: Value) -> StoreResult<Value> {
        self.write(kind, name, |current| {
            let mut object = current.ok_or_else(|| not_found(kind, name))?;
            merge_patch(&mut object, &patch);
            Ok(Change::Put(object, WatchEventType::Modified))
        })
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> StoreResult<()> {
        self.write(kind, name, |current| {
            current
                .map(Change::Remove)
                .ok_or_else(|| not_found(kind, name))
        })?;
        Ok(())
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
        resource_version: Option<&str>,
    ) -> StoreResult<RawWatchStream> {
        // Subscribe before reading so no commit can slip between the
        // read and the wait.
        let changes = self.revision.subscribe();
        let (after, pending) = match resource_version {
            Some(rv) => {
                let after = rv.parse::<u64>().map_err(|_| {
                    StoreError::invalid(format!("resourceVersion `{rv}` is not a revision"))
                })?;
                let compacted = self.compacted_revision()?;
                if after < compacted {
                    return Err(expired(after, compacted));
                }
                (after, VecDeque::new())
            }
            None => self.snapshot(kind, selector)?,
        };
        debug!(kind = kind.path(), %selector, after, "local watch opened");

        let cursor = Cursor {
            store: self.clone(),
            kind,
            selector: selector.clone(),
            after,
            pending,
            changes,
        };
        let stream = futures_util::stream::unfold(cursor, |mut c| async move {
            loop {
                if let Some(event) = c.pending.pop_front() {
                    return Some((Ok(event), c));
                }
                match c.store.events_after(c.kind, &c.selector, c.after) {
                    Ok((events, last)) => {
                        c.after = last;
                        if events.is_empty() {
                            if c.changes.changed().await.is_err() {
                                return None;
                            }
                        } else {
                            c.pending.extend(events);
                        }
                    }
                    Err(e) => {
                        // A cursor that fell behind compaction cannot recover.
                        c.pending.clear();
                        return Some((Err(e), c));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

fn parse(bytes: &[u8]) -> StoreResult<Value> {
    serde_json::from_slice(bytes).map_err(decode_err)
}

fn decode_err(e: serde_json::Error) -> StoreError {
    StoreError::decode(e.to_string())
}

fn expired(after: u64, compacted: u64) -> StoreError {
    let mut err = StoreError::new(
        ErrorKind::Expired,
        format!("too old resource version: {after} (history starts after {compacted})"),
    );
    err.status = Some(410);
    err
}

fn not_found(kind: ResourceKind, name: &str) -> StoreError {
    StoreError::not_found(format!("{} \"{}\" not found", kind.path(), name))
}

fn name_of(object: &Value) -> Option<String> {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn version_of(object: &Value) -> Option<String> {
    object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn labels_of(object: &Value) -> Labels {
    object
        .pointer("/metadata/labels")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn set_meta(object: &mut Value, field: &str, value: Value) {
    if !object.is_object() {
        *object = Value::Object(Map::new());
    }
    if let Value::Object(map) = object {
        let meta = map
            .entry("metadata".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        if let Value::Object(meta) = meta {
            meta.insert(field.to_string(), value);
        }
    }
}

fn stamp(object: &mut Value, namespace: &str, rev: u64) {
    set_meta(object, "namespace", Value::from(namespace));
    set_meta(object, "resourceVersion", Value::from(rev.to_string()));
}
