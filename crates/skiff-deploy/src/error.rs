//! Reconciler error types.

use skiff_core::NameError;
use skiff_store::{SelectorError, StoreError};
use thiserror::Error;

/// Errors that end a one-shot reconciler operation.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Deploy was asked to reuse the current image, but nothing is deployed.
    #[error("no image given and app `{0}` has no deployed version to reuse")]
    NoPriorVersion(String),

    #[error("app `{0}` is not deployed")]
    NotDeployed(String),

    /// More than one controller claims to be the app's current version.
    #[error("app `{app}` has several current replication controllers: {}", .controllers.join(", "))]
    AmbiguousState { app: String, controllers: Vec<String> },

    /// The image tag cannot be turned into a build version.
    #[error("cannot derive a build version from `{image}`: {reason}")]
    InvalidVersion { image: String, reason: String },

    #[error("controller `{0}` has no container image")]
    MissingImage(String),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("invalid label selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type DeployResult<T> = Result<T, DeployError>;
