//! skiff-store: resource store client for skiff.
//!
//! Typed CRUD and watch over a namespaced resource store. Two backends
//! implement the same [`ResourceStore`] trait:
//!
//! - [`HttpStore`] talks to the cluster REST API (usually through
//!   `kubectl proxy`).
//! - [`LocalStore`] is an embedded [redb](https://docs.rs/redb) database
//!   with the same semantics: atomic create, optimistic replace keyed on
//!   `resourceVersion`, and watches resumable from any revision.
//!
//! # Architecture
//!
//! Backends move untyped JSON documents. The [`Api`] facade converts them
//! to and from the typed resources in [`types`]; secret payloads cross the
//! base64 boundary there (see [`codec`]), so callers only see raw bytes.
//!
//! Every failure is a [`StoreError`] carrying an [`ErrorKind`], the raw
//! HTTP status when there was one, and the decoded status body.

pub mod client;
pub mod codec;
pub mod error;
pub mod local;
pub mod merge;
pub mod rest;
pub mod selector;
pub mod tables;
pub mod types;

pub use client::{
    Api, DEFAULT_EVENT_RETENTION, DEFAULT_REQUEST_TIMEOUT, LineStream, LogOptions, RawWatchStream,
    ResourceStore, StoreConfig, WatchStream, connect,
};
pub use error::{ErrorKind, StoreError, StoreResult, StoreResultExt};
pub use local::LocalStore;
pub use rest::HttpStore;
pub use selector::{LabelSelector, SelectorError, SelectorOp};
pub use types::*;
