//! `skiff deploy-image`, `build`, `build-and-deploy`, `delete-app`,
//! `get-config`, `set-config`, `scale` and `status`.

use std::path::Path;

use anyhow::{Context as _, bail};
use skiff_deploy::{DeployError, Deployer, Deployment};
use skiff_store::SecretData;
use skiff_core::normalize_app_name;
use skiff_trigger::{DockerBuilder, GitCheckout, ImageBuilder, PushTrigger};
use tracing::info;

use super::Context;

pub async fn deploy_image(ctx: &Context, app: &str, image: Option<&str>) -> anyhow::Result<()> {
    let deployer = Deployer::new(ctx.app_store()?);
    let deployment = deployer.deploy(app, image, None).await?;
    print_deployment(&deployment);
    Ok(())
}

/// Build and push an image without deploying it.
pub async fn build(ctx: &Context, path: &Path, app: &str, version: &str) -> anyhow::Result<()> {
    let app = normalize_app_name(app)?;
    let image = DockerBuilder::new(&ctx.config.build.registry)
        .build(path, &app, version)
        .await
        .with_context(|| format!("building {}", path.display()))?;
    println!("✓ Built {image}");
    Ok(())
}

pub async fn build_and_deploy(
    ctx: &Context,
    path: &Path,
    app: &str,
    version: &str,
) -> anyhow::Result<()> {
    let trigger = PushTrigger::new(
        Deployer::new(ctx.app_store()?),
        GitCheckout::new(),
        DockerBuilder::new(&ctx.config.build.registry),
        &ctx.config.build.staging_root,
    );
    let deployment = trigger.build_and_deploy(path, app, version).await?;
    print_deployment(&deployment);
    Ok(())
}

pub async fn delete_app(ctx: &Context, app: &str) -> anyhow::Result<()> {
    Deployer::new(ctx.app_store()?).delete(app).await?;
    println!("✓ Deleted {app}");
    Ok(())
}

pub async fn get_config(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let Some(config) = Deployer::new(ctx.app_store()?).get_config(app).await? else {
        bail!("no config for app {app}");
    };
    for (key, value) in &config.data {
        println!("{key}={}", String::from_utf8_lossy(value));
    }
    Ok(())
}

/// Merge the pairs into the stored config, then roll out a version
/// carrying it.
pub async fn set_config(ctx: &Context, app: &str, pairs: &[String]) -> anyhow::Result<()> {
    let data = parse_pairs(pairs)?;
    let deployer = Deployer::new(ctx.app_store()?);
    let config = deployer.update_config(app, data).await?;

    match deployer.deploy(app, None, Some(&config)).await {
        Ok(deployment) => print_deployment(&deployment),
        Err(DeployError::NoPriorVersion(app)) => {
            info!(app = %app, "config stored; it applies from the first deploy");
            println!("✓ Config updated for {app} (not deployed yet)");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn scale(ctx: &Context, app: &str, replicas: u32) -> anyhow::Result<()> {
    let controller = Deployer::new(ctx.app_store()?).scale_to(app, replicas).await?;
    println!("✓ Scaled {} to {replicas} replicas", controller.metadata.name);
    Ok(())
}

pub async fn status(ctx: &Context, app: &str, format: &str) -> anyhow::Result<()> {
    let status = Deployer::new(ctx.app_store()?).status(app).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => println!("{app}: {status}"),
    }
    Ok(())
}

fn print_deployment(deployment: &Deployment) {
    let identity = &deployment.identity;
    println!(
        "✓ Deployed {} version {} ({})",
        identity.name, identity.build_version, identity.image
    );
    for retired in &deployment.retired {
        println!("  retired {retired}");
    }
}

/// Parse `KEY=VALUE` arguments. Values may themselves contain `=`.
fn parse_pairs(pairs: &[String]) -> anyhow::Result<SecretData> {
    pairs
        .iter()
        .map(|pair| -> anyhow::Result<(String, Vec<u8>)> {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("expected KEY=VALUE, got {pair:?}"))?;
            if key.is_empty() {
                bail!("empty key in {pair:?}");
            }
            Ok((key.to_string(), value.as_bytes().to_vec()))
        })
        .collect()
}
