//! Secret projector: keeps a local file in step with one secret.
//!
//! On start the secret is read directly and rendered if present. The
//! projector then watches from the last resourceVersion it processed;
//! each `ADDED`/`MODIFIED` event for the target re-renders the whole file,
//! so redelivered or replayed events are harmless. When the watch breaks
//! or ends, it backs off and reopens from that same resourceVersion.
//! Delivery is at-least-once and the file is eventually consistent.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use skiff_store::{
    Api, ErrorKind, LabelSelector, Resource, ResourceStore, Secret, SecretData, StoreError,
    StoreResultExt, WatchEvent,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::pause;

/// Where a secret's contents end up.
pub trait Projection: Send + Sync {
    /// Replace the projected output with `data`.
    fn render(&self, data: &SecretData) -> SyncResult<()>;
}

/// An `authorized_keys` file: every value trimmed, one per line, in key
/// order.
#[derive(Debug, Clone)]
pub struct AuthorizedKeysFile {
    path: PathBuf,
}

impl AuthorizedKeysFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(data: &SecretData) -> String {
        let mut out = String::new();
        for value in data.values() {
            out.push_str(String::from_utf8_lossy(value).trim());
            out.push('\n');
        }
        out
    }
}

impl Projection for AuthorizedKeysFile {
    fn render(&self, data: &SecretData) -> SyncResult<()> {
        // Written beside the target and renamed over it, so sshd never
        // reads a half-written file.
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let mut file = std::fs::File::create(&tmp).map_err(|e| SyncError::io(&tmp, e))?;
        file.write_all(Self::contents(data).as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| SyncError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| SyncError::io(&self.path, e))
    }
}

pub struct SecretProjector<P> {
    store: Arc<dyn ResourceStore>,
    name: String,
    selector: LabelSelector,
    projection: P,
    backoff: Duration,
    /// Last resourceVersion processed; watches resume from here.
    resource_version: Option<String>,
}

impl<P: Projection> SecretProjector<P> {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        name: &str,
        selector: LabelSelector,
        projection: P,
    ) -> Self {
        Self {
            store,
            name: name.to_string(),
            selector,
            projection,
            backoff: Duration::from_secs(30),
            resource_version: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    /// Project until `shutdown` is signalled.
    ///
    /// Transient store failures are logged and retried after the backoff.
    /// Failures the store will keep returning, such as a rejected
    /// credential, end the loop with that error.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SyncResult<()> {
        if let Err(e) = self.prime().await {
            if is_fatal(&e) {
                error!(secret = %self.name, error = %e, "initial read rejected");
                return Err(e);
            }
            error!(secret = %self.name, error = %e, "initial read failed, watching anyway");
        }

        loop {
            tokio::select! {
                result = self.watch_once() => match result {
                    Ok(()) => info!(secret = %self.name, "watch ended"),
                    Err(e) if is_fatal(&e) => {
                        error!(
                            secret = %self.name,
                            error = %e,
                            resource_version = ?self.resource_version,
                            "watch rejected, stopping"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(
                            secret = %self.name,
                            error = %e,
                            resource_version = ?self.resource_version,
                            backoff_secs = self.backoff.as_secs_f64(),
                            "watch failed"
                        );
                        if is_expired(&e) {
                            self.resync().await?;
                        }
                    }
                },
                _ = shutdown.changed() => break,
            }
            if !pause(self.backoff, &mut shutdown).await {
                break;
            }
        }
        debug!(secret = %self.name, "projector shutting down");
        Ok(())
    }

    /// Read the secret directly and render it if it exists.
    pub async fn prime(&mut self) -> SyncResult<()> {
        let secrets = Api::<Secret>::new(self.store.as_ref());
        match secrets.get(&self.name).await.optional()? {
            Some(secret) => self.project(&secret),
            None => {
                warn!(secret = %self.name, "secret not found, waiting for it to appear");
                Ok(())
            }
        }
    }

    /// Consume one watch session from the remembered resourceVersion.
    ///
    /// Returns `Ok` when the server closes the stream and `Err` on the
    /// first failure; either way the caller reopens.
    pub async fn watch_once(&mut self) -> SyncResult<()> {
        let secrets = Api::<Secret>::new(self.store.as_ref());
        debug!(
            secret = %self.name,
            resource_version = ?self.resource_version,
            "opening watch"
        );
        let mut stream = secrets
            .watch(&self.selector, self.resource_version.as_deref())
            .await?;
        while let Some(event) = stream.next().await {
            self.apply(event?)?;
        }
        Ok(())
    }

    /// Handle one event. The resourceVersion only advances once the event
    /// has been fully processed.
    pub fn apply(&mut self, event: WatchEvent<Secret>) -> SyncResult<()> {
        match event {
            WatchEvent::Added(secret) | WatchEvent::Modified(secret) => {
                if secret.name() == self.name {
                    self.project(&secret)?;
                } else {
                    self.advance(secret.resource_version());
                }
            }
            WatchEvent::Deleted(secret) => {
                if secret.name() == self.name {
                    warn!(secret = %self.name, "secret deleted, keeping last projection");
                }
                self.advance(secret.resource_version());
            }
            WatchEvent::Bookmark(rv) => self.advance(Some(&rv)),
            WatchEvent::Error(status) => {
                return Err(StoreError::from_status_object(status).into());
            }
        }
        Ok(())
    }

    fn project(&mut self, secret: &Secret) -> SyncResult<()> {
        self.projection.render(&secret.data)?;
        self.advance(secret.resource_version());
        info!(
            secret = %self.name,
            keys = secret.data.len(),
            resource_version = ?self.resource_version,
            "projected secret"
        );
        Ok(())
    }

    fn advance(&mut self, rv: Option<&str>) {
        if let Some(rv) = rv.filter(|rv| !rv.is_empty()) {
            self.resource_version = Some(rv.to_string());
        }
    }

    /// The remembered resourceVersion is gone from the store; start over
    /// from a fresh read.
    async fn resync(&mut self) -> SyncResult<()> {
        self.resource_version = None;
        match self.prime().await {
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                warn!(secret = %self.name, error = %e, "resync read failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

fn is_expired(e: &SyncError) -> bool {
    matches!(e, SyncError::Store(s) if s.kind == ErrorKind::Expired)
}

/// Store errors that retrying will not clear: authorization, validation
/// and undecodable objects.
fn is_fatal(e: &SyncError) -> bool {
    matches!(e, SyncError::Store(s) if !s.is_transient())
}
