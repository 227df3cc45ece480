//! Parse and validate cached-image configuration and persisted resource state.

pub mod config;
pub mod state;

pub use config::{ConfigError, Configuration};
pub use state::{ResourceState, StateError, NIL_ID};
