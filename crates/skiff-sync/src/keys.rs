//! Authorized push keys.
//!
//! Public keys live in one secret, `ssh-keys`, keyed by a user-chosen
//! name. The projector watches that secret; `register_key` writes to it.

use skiff_store::{
    Api, LabelSelector, ObjectMeta, Resource, ResourceStore, Secret, StoreResultExt,
};
use tracing::info;

use crate::error::{SyncError, SyncResult};

pub const AUTHORIZED_KEYS_SECRET: &str = "ssh-keys";
pub const KEY_TYPE_LABEL: &str = "type";
pub const KEY_TYPE_VALUE: &str = "ssh-keys";

/// Selector the projector watches with.
pub fn key_selector() -> SyncResult<LabelSelector> {
    Ok(LabelSelector::eq(KEY_TYPE_LABEL, KEY_TYPE_VALUE)?)
}

/// Add or replace the public key stored under `name`.
pub async fn register_key(
    store: &dyn ResourceStore,
    name: &str,
    public_key: &str,
) -> SyncResult<Secret> {
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid_name {
        return Err(SyncError::InvalidKeyName(name.to_string()));
    }
    let public_key = public_key.trim();
    if public_key.is_empty() || public_key.contains('\n') {
        return Err(SyncError::InvalidPublicKey);
    }

    let secrets = Api::<Secret>::new(store);
    let stored = match secrets.get(AUTHORIZED_KEYS_SECRET).await.optional()? {
        Some(mut existing) => {
            existing
                .data
                .insert(name.to_string(), public_key.as_bytes().to_vec());
            secrets.replace(&existing).await?
        }
        None => {
            let meta = ObjectMeta::named(AUTHORIZED_KEYS_SECRET)
                .with_label(KEY_TYPE_LABEL, KEY_TYPE_VALUE);
            let data = [(name.to_string(), public_key.as_bytes().to_vec())].into();
            secrets.create(&Secret::new(meta, data)).await?
        }
    };
    info!(
        key = %name,
        known_keys = stored.data.len(),
        version = ?stored.resource_version(),
        "public key registered"
    );
    Ok(stored)
}
