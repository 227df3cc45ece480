//! Error types for cacheprobe-engine.

use cacheprobe_options::Diagnostics;

use crate::probe::ProbeError;

/// Errors that abort a reconciliation pass.
///
/// Cache misses are not errors; they are reported as warnings alongside a
/// `NotFound` state.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration file is unreadable or incomplete.
    #[error("{0}")]
    Config(#[from] cacheprobe_config::ConfigError),

    /// The state file cannot be read or written.
    #[error("{0}")]
    State(#[from] cacheprobe_config::StateError),

    /// Option resolution produced error diagnostics.
    #[error("configuration has {error_count} error(s)")]
    InvalidOptions {
        error_count: usize,
        diagnostics: Diagnostics,
    },

    /// The probe succeeded but its image digest cannot be read, so no state
    /// can be trusted.
    #[error("cannot read digest of cached image: {source}")]
    Digest { source: ProbeError },

    /// The probe was cancelled.
    #[error("{0}")]
    Probe(ProbeError),

    /// A registry operation was cancelled.
    #[error("{0}")]
    Image(#[from] cacheprobe_image::ImageError),

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] cacheprobe_util::UtilError),

    /// The scoped workspace could not be created.
    #[error("cannot create workspace: {source}")]
    Workspace { source: std::io::Error },
}

impl EngineError {
    /// Whether the pass stopped because it was cancelled or ran out of time.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Probe(e) => e.is_cancellation(),
            Self::Image(e) => e.is_cancellation(),
            Self::Util(e) => e.is_cancellation(),
            _ => false,
        }
    }
}
