//! `skiff logs`: tail the app container of one of an app's pods.

use anyhow::{Context as _, bail};
use futures_util::StreamExt;
use skiff_core::normalize_app_name;
use skiff_deploy::{APP_CONTAINER, APP_LABEL};
use skiff_store::{Api, LabelSelector, LogOptions, Pod};
use tracing::info;

use super::{Context, shutdown_on_ctrl_c};

pub async fn logs(ctx: &Context, app: &str, lines: u32, follow: bool) -> anyhow::Result<()> {
    let app = normalize_app_name(app)?;
    let store = ctx.app_store()?;
    let selector = LabelSelector::eq(APP_LABEL, &app)?;
    let pods = Api::<Pod>::new(store.as_ref())
        .list(&selector)
        .await
        .with_context(|| format!("listing pods of {app}"))?;
    let Some(pod) = pick_pod(pods) else {
        bail!("no pods found for app {app}");
    };
    info!(%app, pod = %pod.metadata.name, lines, follow, "reading logs");

    let options = LogOptions {
        container: Some(APP_CONTAINER.to_string()),
        tail_lines: Some(lines),
        follow,
    };
    let mut stream = store.pod_logs(&pod.metadata.name, &options).await?;
    let mut shutdown = shutdown_on_ctrl_c();
    loop {
        tokio::select! {
            line = stream.next() => match line {
                Some(line) => println!("{}", line?),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}

/// The last running pod, else the last pod listed.
fn pick_pod(mut pods: Vec<Pod>) -> Option<Pod> {
    let running = pods
        .iter()
        .rposition(|pod| pod.status.phase.as_deref() == Some("Running"));
    match running {
        Some(index) => Some(pods.swap_remove(index)),
        None => pods.pop(),
    }
}
