//! Checkout collaborator.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::command::run;
use crate::error::TriggerResult;

/// Materializes the pushed revision as a plain directory.
#[async_trait]
pub trait Checkout: Send + Sync {
    async fn checkout(&self, dir: &Path) -> TriggerResult<()>;
}

/// `git --work-tree {dir} checkout -f` against a bare repository.
#[derive(Debug, Clone, Default)]
pub struct GitCheckout {
    /// Repository to check out from; the current directory when unset,
    /// which is where git runs hooks.
    git_dir: Option<PathBuf>,
}

impl GitCheckout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_git_dir(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: Some(git_dir.into()),
        }
    }
}

#[async_trait]
impl Checkout for GitCheckout {
    async fn checkout(&self, dir: &Path) -> TriggerResult<()> {
        tokio::fs::create_dir_all(dir).await?;
        info!(dir = %dir.display(), "checking out");

        let mut args: Vec<OsString> = Vec::new();
        if let Some(git_dir) = &self.git_dir {
            args.push(format!("--git-dir={}", git_dir.display()).into());
        }
        args.push("--work-tree".into());
        args.push(dir.as_os_str().to_os_string());
        args.push("checkout".into());
        args.push("-f".into());
        run("git", args).await
    }
}
