//! Trigger error types.

use skiff_core::NameError;
use skiff_deploy::DeployError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("malformed push update `{0}`: expected `<old-sha> <new-sha> <ref>`")]
    MalformedUpdate(String),

    #[error("`{program}` failed: {reason}")]
    Command { program: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("deploy failed: {0}")]
    Deploy(#[from] DeployError),
}

pub type TriggerResult<T> = Result<T, TriggerError>;
