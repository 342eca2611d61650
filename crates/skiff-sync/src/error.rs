//! Sync error types.

use std::path::PathBuf;

use skiff_store::{SelectorError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store unreachable after {attempts} attempts: {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("host keys still contended after {0} attempts")]
    ConflictRetriesExhausted(u32),

    #[error("host key secret has no `{0}` key")]
    MissingKey(String),

    #[error("invalid key name `{0}`: use letters, digits, '-', '_' or '.'")]
    InvalidKeyName(String),

    #[error("public key is empty or spans several lines")]
    InvalidPublicKey,

    #[error("generating {algorithm} key failed: {reason}")]
    KeyGen { algorithm: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shut down")]
    Cancelled,

    #[error("invalid label selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
