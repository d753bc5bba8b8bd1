//! Upload error types.

use std::fmt;

use dcdn_protocol::IdentityError;
use dcdn_registry::RegistryError;
use dcdn_transfer::TransferError;

/// Step of the per-item pipeline an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Put,
    Start,
    Append,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Put => "put",
            Self::Start => "start",
            Self::Append => "append",
            Self::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// Errors produced while uploading.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage} failed: {source}")]
    Transfer {
        stage: Stage,
        #[source]
        source: TransferError,
    },

    #[error("register failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("identity unavailable: {0}")]
    Identity(#[from] IdentityError),

    #[error("cancelled")]
    Cancelled,

    #[error("worker stopped before finishing the item")]
    WorkerLost,
}

impl UploadError {
    pub(crate) fn at(stage: Stage) -> impl FnOnce(TransferError) -> Self {
        move |source| Self::Transfer { stage, source }
    }

    /// The pipeline step that failed, if the error came from a transfer call.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Transfer { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
