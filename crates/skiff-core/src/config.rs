//! skiff.toml configuration parser.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults used by a stock cluster reached through `kubectl proxy`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SkiffConfig {
    pub cluster: ClusterConfig,
    pub build: BuildConfig,
    pub keys: KeysConfig,
}

/// Where the resource store lives and which namespaces skiff owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// `http://` for a cluster API (usually `kubectl proxy`), `file://` for a local store.
    pub api_root: String,
    /// Namespace holding application services, controllers and config.
    pub app_namespace: String,
    /// Namespace holding the builder's shared state (keys, host identity).
    pub system_namespace: String,
    /// Bound on one API request; watches and followed logs only bound
    /// the wait for the first response.
    pub request_timeout_secs: u64,
    /// Revisions of change history a `file://` store keeps for watches.
    pub event_retention: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_root: "http://localhost:8001".to_string(),
            app_namespace: "skiffapp".to_string(),
            system_namespace: "skiff".to_string(),
            request_timeout_secs: 30,
            event_retention: 1000,
        }
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Image repository prefix, e.g. `gcr.io/my-project`.
    pub registry: String,
    /// Directory under which pushed repositories are checked out.
    pub staging_root: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            registry: "localhost:5000".to_string(),
            staging_root: PathBuf::from("/var/build"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeysConfig {
    pub authorized_keys: PathBuf,
    pub host_key_dir: PathBuf,
    pub watch_backoff_secs: u64,
    pub store_wait_attempts: u32,
    pub store_wait_secs: u64,
    pub conflict_retries: u32,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            authorized_keys: PathBuf::from("/home/git/.ssh/authorized_keys"),
            host_key_dir: PathBuf::from("/etc/ssh"),
            watch_backoff_secs: 30,
            store_wait_attempts: 5,
            store_wait_secs: 5,
            conflict_retries: 5,
        }
    }
}

impl KeysConfig {
    pub fn watch_backoff(&self) -> Duration {
        Duration::from_secs(self.watch_backoff_secs)
    }

    pub fn store_wait(&self) -> Duration {
        Duration::from_secs(self.store_wait_secs)
    }
}

impl SkiffConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SkiffConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
