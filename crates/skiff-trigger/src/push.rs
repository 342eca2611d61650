//! Push trigger: maps a pushed ref to a build and deploy.

use std::path::{Path, PathBuf};

use skiff_core::normalize_app_name;
use skiff_deploy::{Deployer, Deployment};
use tracing::{info, warn};

use crate::builder::ImageBuilder;
use crate::checkout::Checkout;
use crate::error::{TriggerError, TriggerResult};

/// Only pushes to this ref deploy.
pub const DEPLOY_REF: &str = "refs/heads/master";

/// Characters of the pushed sha used as the image version.
const VERSION_LEN: usize = 6;

/// One ref update as git hands it to `post-receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUpdate {
    pub previous: String,
    pub current: String,
    pub refname: String,
}

impl PushUpdate {
    /// Parse `<old-sha> <new-sha> <ref>`.
    pub fn parse(line: &str) -> TriggerResult<Self> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(previous), Some(current), Some(refname), None) => Ok(Self {
                previous: previous.to_string(),
                current: current.to_string(),
                refname: refname.to_string(),
            }),
            _ => Err(TriggerError::MalformedUpdate(line.trim().to_string())),
        }
    }

    /// Short form of the pushed sha, used as the image version.
    pub fn version(&self) -> &str {
        self.current
            .get(..VERSION_LEN)
            .unwrap_or(&self.current)
    }
}

#[derive(Debug)]
pub enum TriggerOutcome {
    /// The ref was not the deploy ref; nothing happened.
    Skipped { refname: String },
    Deployed(Box<Deployment>),
}

pub struct PushTrigger<C, B> {
    deployer: Deployer,
    checkout: C,
    builder: B,
    staging_root: PathBuf,
}

impl<C: Checkout, B: ImageBuilder> PushTrigger<C, B> {
    pub fn new(deployer: Deployer, checkout: C, builder: B, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            deployer,
            checkout,
            builder,
            staging_root: staging_root.into(),
        }
    }

    /// Handle a push to repository `repo` (its directory name).
    pub async fn handle(&self, repo: &str, update: &PushUpdate) -> TriggerResult<TriggerOutcome> {
        if update.refname != DEPLOY_REF {
            warn!(
                refname = %update.refname,
                "not deploying; push {DEPLOY_REF} to deploy"
            );
            return Ok(TriggerOutcome::Skipped {
                refname: update.refname.clone(),
            });
        }

        let app = normalize_app_name(repo.strip_suffix(".git").unwrap_or(repo))?;
        info!(%app, sha = %update.current, "push received");

        let staging = self.staging_root.join(&app);
        self.checkout.checkout(&staging).await?;

        let deployment = self
            .build_and_deploy(&staging, &app, update.version())
            .await?;
        Ok(TriggerOutcome::Deployed(Box::new(deployment)))
    }

    /// Build `dir` as `version` of `app` and deploy the resulting image.
    pub async fn build_and_deploy(
        &self,
        dir: &Path,
        app: &str,
        version: &str,
    ) -> TriggerResult<Deployment> {
        let image = self.builder.build(dir, app, version).await?;
        Ok(self.deployer.deploy(app, Some(&image), None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_tokens() {
        let update = PushUpdate::parse("0000000 a1b2c3d4e5f6 refs/heads/master\n").unwrap();
        assert_eq!(update.previous, "0000000");
        assert_eq!(update.current, "a1b2c3d4e5f6");
        assert_eq!(update.refname, DEPLOY_REF);
        assert_eq!(update.version(), "a1b2c3");
    }

    #[test]
    fn rejects_other_token_counts() {
        assert!(PushUpdate::parse("").is_err());
        assert!(PushUpdate::parse("a b").is_err());
        assert!(PushUpdate::parse("a b c d").is_err());
    }

    #[test]
    fn short_sha_is_used_whole() {
        let update = PushUpdate::parse("a abc refs/heads/master").unwrap();
        assert_eq!(update.version(), "abc");
    }
}
