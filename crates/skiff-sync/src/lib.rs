//! skiff shared-state synchronization.
//!
//! Builder replicas are stateless and sit behind one address, so the
//! state they must agree on lives in the resource store and is projected
//! onto each replica's filesystem:
//!
//! - **`projector`**: Long-running watch that mirrors the `ssh-keys`
//!   secret into an `authorized_keys` file
//! - **`host_keys`**: One-shot, first-writer-wins bootstrap of the
//!   shared SSH host identity
//! - **`keys`**: Registering a public key (the client side of the projector)
//! - **`keygen`**: Key generation collaborator

pub mod error;
pub mod host_keys;
pub mod keygen;
pub mod keys;
pub mod projector;

#[cfg(test)]
mod testing;

use std::time::Duration;

use tokio::sync::watch;

pub use error::{SyncError, SyncResult};
pub use host_keys::{HOST_KEY_ALGORITHMS, HOST_KEY_SECRET, HostKeyConfig, HostKeyInitializer, InitOutcome};
pub use keygen::{KeyGenerator, SshKeygen};
pub use keys::{AUTHORIZED_KEYS_SECRET, KEY_TYPE_LABEL, KEY_TYPE_VALUE, key_selector, register_key};
pub use projector::{AuthorizedKeysFile, Projection, SecretProjector};

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `false` when the caller should stop.
pub(crate) async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}
