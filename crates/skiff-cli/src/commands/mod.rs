pub mod app;
pub mod hook;
pub mod keys;
pub mod logs;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use skiff_core::SkiffConfig;
use skiff_store::{ResourceStore, StoreConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Loaded configuration shared by every command.
pub struct Context {
    pub config: SkiffConfig,
}

impl Context {
    pub fn load(path: &Path, api_root: Option<String>) -> anyhow::Result<Self> {
        let mut config = SkiffConfig::load_or_default(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if let Some(api_root) = api_root {
            config.cluster.api_root = api_root;
        }
        debug!(api_root = %config.cluster.api_root, "configuration loaded");
        Ok(Self { config })
    }

    /// Store scoped to the namespace holding applications.
    pub fn app_store(&self) -> anyhow::Result<Arc<dyn ResourceStore>> {
        self.store(&self.config.cluster.app_namespace)
    }

    /// Store scoped to the namespace holding the builder's own state.
    pub fn system_store(&self) -> anyhow::Result<Arc<dyn ResourceStore>> {
        self.store(&self.config.cluster.system_namespace)
    }

    fn store(&self, namespace: &str) -> anyhow::Result<Arc<dyn ResourceStore>> {
        let cluster = &self.config.cluster;
        let config = StoreConfig::new(&cluster.api_root, namespace)
            .with_request_timeout(cluster.request_timeout())
            .with_event_retention(cluster.event_retention);
        skiff_store::connect(&config)
            .with_context(|| format!("connecting to {}", self.config.cluster.api_root))
    }
}

/// Shutdown receiver flipped to `true` on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would read as a shutdown.
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });
    shutdown_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_root_flag_overrides_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skiff.toml");
        std::fs::write(
            &path,
            "[cluster]\napi_root = \"http://cluster:8001\"\napp_namespace = \"apps\"\n",
        )
        .unwrap();

        let ctx = Context::load(&path, None).unwrap();
        assert_eq!(ctx.config.cluster.api_root, "http://cluster:8001");
        assert_eq!(ctx.config.cluster.app_namespace, "apps");
        assert_eq!(ctx.config.cluster.system_namespace, "skiff");

        let ctx = Context::load(&path, Some("file:///tmp/s.redb".to_string())).unwrap();
        assert_eq!(ctx.config.cluster.api_root, "file:///tmp/s.redb");
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::load(&dir.path().join("absent.toml"), None).unwrap();
        assert_eq!(ctx.config, SkiffConfig::default());
    }

    #[test]
    fn stores_are_scoped_to_their_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let root = format!("file://{}", dir.path().join("store.redb").display());
        let ctx = Context::load(&dir.path().join("absent.toml"), Some(root)).unwrap();
        assert_eq!(ctx.app_store().unwrap().namespace(), "skiffapp");
    }
}
