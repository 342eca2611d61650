//! skiff: git-push deploys on top of a cluster resource API.
//!
//! # Usage
//!
//! ```text
//! skiff deploy-image web gcr.io/project/web:v3
//! skiff logs web --follow
//! skiff set-config web DATABASE_URL=postgres://db/web
//! echo "$old $new refs/heads/master" | skiff post-receive --repo web.git
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(
    name = "skiff",
    about = "skiff, a small platform that deploys what you git push",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to skiff.toml. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "skiff.toml")]
    config: PathBuf,

    /// Override [cluster].api_root (http://host:port or file:///path/to/store.redb).
    #[arg(long, global = true)]
    api_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an image, or redeploy the current one when IMAGE is omitted
    DeployImage {
        app: String,
        image: Option<String>,
    },
    /// Build a checked-out directory into an image and push it
    Build {
        app: String,
        /// Image tag for this build (default: UTC timestamp, MMDDYYHHMMSS)
        #[arg(long)]
        tag: Option<String>,
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },
    /// Build a checked-out directory into an image and deploy it
    BuildAndDeploy {
        app: String,
        /// Image tag for this build (default: UTC timestamp, MMDDYYHHMMSS)
        #[arg(long)]
        tag: Option<String>,
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },
    /// Print the container log of one of an app's pods
    Logs {
        app: String,
        /// Number of trailing lines to print
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: u32,
        /// Keep streaming until Ctrl-C
        #[arg(short, long)]
        follow: bool,
    },
    /// Delete an app and every cluster resource it owns
    DeleteApp { app: String },
    /// Print an app's configuration as KEY=VALUE lines
    GetConfig { app: String },
    /// Merge KEY=VALUE pairs into an app's configuration and redeploy it
    SetConfig {
        app: String,
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
    /// Set the replica count of an app's current version
    Scale { app: String, replicas: u32 },
    /// Show which versions of an app are running
    Status {
        app: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Register a public key allowed to push
    AddKey {
        name: String,
        /// Public key file, e.g. ~/.ssh/id_ed25519.pub
        #[arg(long)]
        key_file: PathBuf,
    },
    /// Keep an authorized_keys file in sync with the registered keys
    WatchKeys {
        /// Overrides [keys].authorized_keys
        #[arg(long)]
        destination: Option<PathBuf>,
    },
    /// Adopt or generate the shared SSH host keys
    HostKeys {
        /// Overrides [keys].host_key_dir
        #[arg(long)]
        key_dir: Option<PathBuf>,
    },
    /// git post-receive hook: read one ref update from stdin and deploy it
    PostReceive {
        /// Repository name (default: name of the current directory)
        #[arg(long)]
        repo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,skiff=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = Context::load(&cli.config, cli.api_root)?;

    match cli.command {
        Commands::DeployImage { app, image } => {
            commands::app::deploy_image(&ctx, &app, image.as_deref()).await
        }
        Commands::Build { app, tag, path } => {
            let tag = tag.unwrap_or_else(skiff_trigger::timestamp_tag);
            commands::app::build(&ctx, &path, &app, &tag).await
        }
        Commands::BuildAndDeploy { app, tag, path } => {
            let tag = tag.unwrap_or_else(skiff_trigger::timestamp_tag);
            commands::app::build_and_deploy(&ctx, &path, &app, &tag).await
        }
        Commands::Logs { app, lines, follow } => {
            commands::logs::logs(&ctx, &app, lines, follow).await
        }
        Commands::DeleteApp { app } => commands::app::delete_app(&ctx, &app).await,
        Commands::GetConfig { app } => commands::app::get_config(&ctx, &app).await,
        Commands::SetConfig { app, pairs } => commands::app::set_config(&ctx, &app, &pairs).await,
        Commands::Scale { app, replicas } => commands::app::scale(&ctx, &app, replicas).await,
        Commands::Status { app, format } => commands::app::status(&ctx, &app, &format).await,
        Commands::AddKey { name, key_file } => commands::keys::add_key(&ctx, &name, &key_file).await,
        Commands::WatchKeys { destination } => commands::keys::watch_keys(&ctx, destination).await,
        Commands::HostKeys { key_dir } => commands::keys::host_keys(&ctx, key_dir).await,
        Commands::PostReceive { repo } => commands::hook::post_receive(&ctx, repo).await,
    }
}
