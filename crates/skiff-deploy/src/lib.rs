//! skiff versioned app reconciler.
//!
//! Turns an image plus an optional config secret into a running,
//! versioned application. Every version change creates a brand-new
//! replication controller labelled with its build version; stale
//! versions are then scaled to zero and deleted.
//!
//! # Components
//!
//! - **`identity`**: Image tag extraction and build-version derivation
//! - **`templates`**: Service, controller and secret templates (the `Renderer`)
//! - **`deployer`**: deploy / delete / update_config / scale_to
//! - **`status`**: Observable per-app state

pub mod deployer;
pub mod error;
pub mod identity;
pub mod status;
pub mod templates;

pub use deployer::{Deployer, Deployment};
pub use error::{DeployError, DeployResult};
pub use identity::{AppIdentity, build_version, image_tag};
pub use status::AppStatus;
pub use templates::{Renderer, Templates};

/// Label carrying the application name.
pub const APP_LABEL: &str = "app";

/// Name of the single container in every app pod.
pub const APP_CONTAINER: &str = "app";

/// Label carrying the build version of a controller and its pods.
pub const BUILD_VERSION_LABEL: &str = "build-version";
