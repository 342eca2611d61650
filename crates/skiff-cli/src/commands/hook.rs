//! `skiff post-receive`: installed as the git `post-receive` hook of
//! every repository on the builder.

use anyhow::Context as _;
use skiff_deploy::Deployer;
use skiff_trigger::{DEPLOY_REF, DockerBuilder, GitCheckout, PushTrigger, PushUpdate, TriggerOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::Context;

pub async fn post_receive(ctx: &Context, repo: Option<String>) -> anyhow::Result<()> {
    let repo = match repo {
        Some(repo) => repo,
        None => current_repo()?,
    };

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading ref update from stdin")?;
    let update = PushUpdate::parse(&line)?;

    let trigger = PushTrigger::new(
        Deployer::new(ctx.app_store()?),
        GitCheckout::new(),
        DockerBuilder::new(&ctx.config.build.registry),
        &ctx.config.build.staging_root,
    );
    match trigger.handle(&repo, &update).await? {
        TriggerOutcome::Skipped { refname } => {
            anyhow::bail!("pushed {refname}; only {DEPLOY_REF} is deployed")
        }
        TriggerOutcome::Deployed(deployment) => {
            println!(
                "✓ {} is live at version {}",
                deployment.identity.name, deployment.identity.build_version
            );
            Ok(())
        }
    }
}

/// Git runs the hook inside the bare repository.
fn current_repo() -> anyhow::Result<String> {
    let cwd = std::env::current_dir()?;
    cwd.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot name a repository after {}", cwd.display()))
}
