//! redb table definitions for the local store.
//!
//! Objects are JSON documents keyed by `{namespace}/{kind}/{name}`; every
//! write also appends to the event log keyed by its global revision, and
//! the oldest events are dropped once the log outgrows its retention.

use redb::TableDefinition;

/// Current objects keyed by `{namespace}/{kind}/{name}`.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Change events keyed by the revision that produced them.
pub const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");

/// Store-wide counters (`revision`, `compacted`).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const REVISION_KEY: &str = "revision";

/// Highest revision whose event has been dropped from the log.
pub const COMPACTED_KEY: &str = "compacted";

pub fn object_key(namespace: &str, kind: &str, name: &str) -> String {
    format!("{namespace}/{kind}/{name}")
}

pub fn kind_prefix(namespace: &str, kind: &str) -> String {
    format!("{namespace}/{kind}/")
}
