//! Running external tools.

use std::ffi::OsStr;

use tokio::process::Command;
use tracing::debug;

use crate::error::{TriggerError, TriggerResult};

/// Run `program` with `args`, inheriting stdio; non-zero exit is an error.
pub(crate) async fn run<I, S>(program: &str, args: I) -> TriggerResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    debug!(command = ?command.as_std(), "running");

    let status = command.status().await.map_err(|e| TriggerError::Command {
        program: program.to_string(),
        reason: e.to_string(),
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(TriggerError::Command {
            program: program.to_string(),
            reason: format!("exited with {status}"),
        })
    }
}
