//! Cached-image probing and reconciliation for cacheprobe.

pub mod error;
pub mod probe;
pub mod reconcile;
pub mod workspace;

pub use error::EngineError;
pub use probe::{ArtifactImage, CommandProbe, Probe, ProbeError, ProbeRequest};
pub use reconcile::{CreateOutcome, CreateResult, ReadOutcome, ReadResult, Reconciler};
pub use workspace::ScopedWorkspace;
