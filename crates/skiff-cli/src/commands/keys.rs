//! `skiff add-key`, `watch-keys` and `host-keys`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use skiff_sync::{
    AUTHORIZED_KEYS_SECRET, AuthorizedKeysFile, HostKeyConfig, HostKeyInitializer, InitOutcome,
    SecretProjector, SshKeygen, key_selector, register_key,
};
use tracing::info;

use super::{Context, shutdown_on_ctrl_c};

pub async fn add_key(ctx: &Context, name: &str, key_file: &Path) -> anyhow::Result<()> {
    let public_key = tokio::fs::read_to_string(key_file)
        .await
        .with_context(|| format!("reading {}", key_file.display()))?;
    let store = ctx.system_store()?;
    register_key(store.as_ref(), name, &public_key).await?;
    println!("✓ Added key {name}");
    Ok(())
}

/// Runs until Ctrl-C, or until the store rejects the watch outright.
pub async fn watch_keys(ctx: &Context, destination: Option<PathBuf>) -> anyhow::Result<()> {
    let destination = destination.unwrap_or_else(|| ctx.config.keys.authorized_keys.clone());
    info!(destination = %destination.display(), "projecting authorized keys");

    let mut projector = SecretProjector::new(
        ctx.system_store()?,
        AUTHORIZED_KEYS_SECRET,
        key_selector()?,
        AuthorizedKeysFile::new(destination),
    )
    .with_backoff(ctx.config.keys.watch_backoff());
    projector
        .run(shutdown_on_ctrl_c())
        .await
        .context("projecting authorized keys")
}

pub async fn host_keys(ctx: &Context, key_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = HostKeyConfig::from(&ctx.config.keys);
    if let Some(key_dir) = key_dir {
        config.key_dir = key_dir;
    }
    let key_dir = config.key_dir.clone();

    let outcome = HostKeyInitializer::new(ctx.system_store()?, SshKeygen, config)
        .run(shutdown_on_ctrl_c())
        .await?;
    match outcome {
        InitOutcome::Adopted => println!("✓ Adopted shared host keys into {}", key_dir.display()),
        InitOutcome::Generated => println!("✓ Generated shared host keys in {}", key_dir.display()),
    }
    Ok(())
}
