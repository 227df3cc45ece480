//! Error types for cacheprobe-util.

use std::time::Duration;

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A command failed to execute.
    #[error("cannot execute command: {source}")]
    CommandExec { source: std::io::Error },

    /// The pass was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The pass ran past its deadline.
    #[error("deadline of {}s exceeded", .timeout.as_secs())]
    DeadlineExceeded { timeout: Duration },
}

impl UtilError {
    /// Whether this error means the pass was stopped rather than failing on its own.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded { .. })
    }
}
