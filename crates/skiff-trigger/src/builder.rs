//! Image build collaborator.

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::command::run;
use crate::error::TriggerResult;

/// Builds an app's source directory into a pushed image.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `dir` as `version` of `app` and return the image reference.
    async fn build(&self, dir: &Path, app: &str, version: &str) -> TriggerResult<String>;
}

/// `docker build` then `docker push` to `{registry}/skiff-app-{app}:{version}`.
#[derive(Debug, Clone)]
pub struct DockerBuilder {
    registry: String,
}

impl DockerBuilder {
    pub fn new(registry: &str) -> Self {
        Self {
            registry: registry.trim_end_matches('/').to_string(),
        }
    }

    pub fn image_for(&self, app: &str, version: &str) -> String {
        format!("{}/skiff-app-{app}:{version}", self.registry)
    }
}

/// Tag used when a build is started without one: the UTC time as
/// `MMDDYYHHMMSS`.
pub fn timestamp_tag() -> String {
    tag_at(Utc::now())
}

fn tag_at(time: DateTime<Utc>) -> String {
    time.format("%m%d%y%H%M%S").to_string()
}

#[async_trait]
impl ImageBuilder for DockerBuilder {
    async fn build(&self, dir: &Path, app: &str, version: &str) -> TriggerResult<String> {
        let image = self.image_for(app, version);
        info!(%app, dir = %dir.display(), %image, "building image");
        let args: [&OsStr; 4] = [
            OsStr::new("build"),
            OsStr::new("-t"),
            OsStr::new(&image),
            dir.as_os_str(),
        ];
        run("docker", args).await?;

        info!(%image, "pushing image");
        run("docker", ["push", image.as_str()]).await?;
        Ok(image)
    }
}
