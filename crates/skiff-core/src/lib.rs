//! skiff-core: configuration and naming rules shared by every skiff crate.
//!
//! - **`config`**: `skiff.toml`, with defaults for every section
//! - **`names`**: Application-name normalization (DNS-label syntax)

pub mod config;
pub mod names;

pub use config::{BuildConfig, ClusterConfig, KeysConfig, SkiffConfig};
pub use names::{NameError, normalize_app_name};
