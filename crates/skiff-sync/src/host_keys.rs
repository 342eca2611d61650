//! Shared SSH host identity.
//!
//! Every builder replica must present the same host keys. The first
//! replica to find no `ssh-host-keys` secret generates a set and tries to
//! `create` it; the store's atomic create picks one winner, and every
//! loser throws its keys away and adopts the winner's.

use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use skiff_core::KeysConfig;
use skiff_store::{Api, ObjectMeta, ResourceStore, Secret, SecretData, StoreResultExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::keygen::KeyGenerator;
use crate::pause;

pub const HOST_KEY_SECRET: &str = "ssh-host-keys";

/// One key of each algorithm makes up the host identity.
pub const HOST_KEY_ALGORITHMS: [&str; 3] = ["rsa", "ecdsa", "ed25519"];

#[derive(Debug, Clone)]
pub struct HostKeyConfig {
    /// Directory receiving `ssh_host_{alg}_key`.
    pub key_dir: PathBuf,
    /// Reachability checks before giving up.
    pub wait_attempts: u32,
    pub wait_interval: Duration,
    /// Lost create races tolerated before giving up.
    pub conflict_retries: u32,
    pub conflict_backoff: Duration,
}

impl From<&KeysConfig> for HostKeyConfig {
    fn from(keys: &KeysConfig) -> Self {
        Self {
            key_dir: keys.host_key_dir.clone(),
            wait_attempts: keys.store_wait_attempts,
            wait_interval: keys.store_wait(),
            conflict_retries: keys.conflict_retries,
            conflict_backoff: keys.store_wait(),
        }
    }
}

/// How this replica obtained its host keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Another replica's keys were already stored.
    Adopted,
    /// This replica generated the stored keys.
    Generated,
}

pub struct HostKeyInitializer<G> {
    store: Arc<dyn ResourceStore>,
    keygen: G,
    config: HostKeyConfig,
}

impl<G: KeyGenerator> HostKeyInitializer<G> {
    pub fn new(store: Arc<dyn ResourceStore>, keygen: G, config: HostKeyConfig) -> Self {
        Self {
            store,
            keygen,
            config,
        }
    }

    /// Wait for the store, then make sure local host keys match the
    /// shared identity.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SyncResult<InitOutcome> {
        self.wait_for_store(&mut shutdown).await?;
        self.initialize(&mut shutdown).await
    }

    /// Ping the store at a fixed interval. Transient failures are
    /// retried `wait_attempts` times; anything else fails at once.
    pub async fn wait_for_store(&self, shutdown: &mut watch::Receiver<bool>) -> SyncResult<()> {
        let attempts = self.config.wait_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.ping().await {
                Ok(()) => {
                    debug!(attempt, "store reachable");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "store not reachable yet");
                }
                Err(e) if e.is_transient() => {
                    return Err(SyncError::StoreUnavailable {
                        attempts,
                        source: e,
                    });
                }
                Err(e) => return Err(e.into()),
            }
            if !pause(self.config.wait_interval, shutdown).await {
                return Err(SyncError::Cancelled);
            }
            attempt += 1;
        }
    }

    /// Adopt the stored identity, or generate and store one.
    ///
    /// Keys generated by a replica that loses the create race, or that
    /// fails before storing them, are deleted from `key_dir`.
    pub async fn initialize(&self, shutdown: &mut watch::Receiver<bool>) -> SyncResult<InitOutcome> {
        let secrets = Api::<Secret>::new(self.store.as_ref());

        for attempt in 0..=self.config.conflict_retries {
            if let Some(existing) = secrets.get(HOST_KEY_SECRET).await.optional()? {
                self.write_keys(&existing.data)?;
                info!(dir = %self.config.key_dir.display(), "adopted shared host keys");
                return Ok(InitOutcome::Adopted);
            }

            warn!("no shared host keys, generating");
            let data = match self.generate_keys().await {
                Ok(data) => data,
                Err(e) => return Err(self.discard_keys(e)),
            };
            let secret = Secret::new(ObjectMeta::named(HOST_KEY_SECRET), data);
            match secrets.create(&secret).await {
                Ok(_) => {
                    info!(dir = %self.config.key_dir.display(), "stored generated host keys");
                    return Ok(InitOutcome::Generated);
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        attempt,
                        "another replica stored host keys first, discarding ours"
                    );
                    self.remove_all()?;
                    if !pause(self.config.conflict_backoff, shutdown).await {
                        return Err(SyncError::Cancelled);
                    }
                }
                Err(e) => return Err(self.discard_keys(e.into())),
            }
        }
        Err(SyncError::ConflictRetriesExhausted(
            self.config.conflict_retries + 1,
        ))
    }

    /// Remove whatever keys were generated, keeping `cause` as the error.
    fn discard_keys(&self, cause: SyncError) -> SyncError {
        if let Err(e) = self.remove_all() {
            warn!(error = %e, "cannot remove generated host keys");
        }
        cause
    }

    fn remove_all(&self) -> SyncResult<()> {
        for algorithm in HOST_KEY_ALGORITHMS {
            remove_key_files(&self.key_path(algorithm))?;
        }
        Ok(())
    }

    fn key_path(&self, algorithm: &str) -> PathBuf {
        self.config
            .key_dir
            .join(format!("ssh_host_{algorithm}_key"))
    }

    async fn generate_keys(&self) -> SyncResult<SecretData> {
        let mut data = SecretData::new();
        for algorithm in HOST_KEY_ALGORITHMS {
            let path = self.key_path(algorithm);
            remove_key_files(&path)?;
            let key = self.keygen.generate(algorithm, &path).await?;
            restrict(&path)?;
            // Only private keys are kept, as when adopting.
            remove_file(&public_path(&path))?;
            data.insert(algorithm.to_string(), key);
        }
        Ok(data)
    }

    fn write_keys(&self, data: &SecretData) -> SyncResult<()> {
        // Check the whole set before touching any file.
        for algorithm in HOST_KEY_ALGORITHMS {
            if !data.contains_key(algorithm) {
                return Err(SyncError::MissingKey(algorithm.to_string()));
            }
        }
        for (algorithm, key) in HOST_KEY_ALGORITHMS.iter().filter_map(|a| data.get_key_value(*a)) {
            let path = self.key_path(algorithm);
            remove_key_files(&path)?;
            write_private(&path, key)?;
        }
        Ok(())
    }
}

/// `ssh-keygen -f path` writes the public half to `path.pub`.
pub(crate) fn public_path(path: &Path) -> PathBuf {
    let mut public = path.as_os_str().to_owned();
    public.push(".pub");
    PathBuf::from(public)
}

/// Remove a key and its `.pub` companion if present.
fn remove_key_files(path: &Path) -> SyncResult<()> {
    remove_file(path)?;
    remove_file(&public_path(path))
}

fn remove_file(path: &Path) -> SyncResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

fn write_private(path: &Path, contents: &[u8]) -> SyncResult<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| SyncError::io(path, e))?;
    file.write_all(contents)
        .map_err(|e| SyncError::io(path, e))?;
    restrict(path)
}

fn restrict(path: &Path) -> SyncResult<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| SyncError::io(path, e))
}
