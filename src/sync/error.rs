use thiserror::Error;

use crate::exec::ExecError;

/// Errors that can occur while planning or running a sync.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No destinations given")]
    NoDestinations,

    #[error("Source {0} must be a local directory")]
    SourceNotLocal(String),

    #[error("Destination {0} is local; destinations must be remote")]
    LocalDestination(String),

    #[error("Destination {0} is listed more than once")]
    DuplicateDestination(String),

    #[error("Target {target} is unreachable: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: ExecError,
    },

    #[error("Mirror {from} -> {to} failed: {diagnostic}")]
    MirrorFailed {
        from: String,
        to: String,
        diagnostic: String,
    },

    #[error("Purge on {target} failed: {diagnostic}")]
    PurgeFailed { target: String, diagnostic: String },

    #[error("rsync not found in PATH; install rsync to sync files")]
    RsyncMissing,
}

impl SyncError {
    /// Whether the error was raised before any operation ran.
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            Self::NoDestinations
                | Self::SourceNotLocal(_)
                | Self::LocalDestination(_)
                | Self::DuplicateDestination(_)
        )
    }
}
