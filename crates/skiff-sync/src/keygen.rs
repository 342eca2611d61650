//! Key generation collaborator.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Generates one private key file.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Write a fresh `algorithm` private key to `path` (which does not
    /// exist) and return its contents.
    async fn generate(&self, algorithm: &str, path: &Path) -> SyncResult<Vec<u8>>;
}

/// Shells out to `ssh-keygen`.
#[derive(Debug, Clone, Default)]
pub struct SshKeygen;

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate(&self, algorithm: &str, path: &Path) -> SyncResult<Vec<u8>> {
        debug!(%algorithm, path = %path.display(), "running ssh-keygen");
        let status = Command::new("ssh-keygen")
            .args(["-q", "-t", algorithm, "-N", "", "-f"])
            .arg(path)
            .status()
            .await
            .map_err(|e| SyncError::KeyGen {
                algorithm: algorithm.to_string(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(SyncError::KeyGen {
                algorithm: algorithm.to_string(),
                reason: format!("ssh-keygen exited with {status}"),
            });
        }
        tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::io(path, e))
    }
}
