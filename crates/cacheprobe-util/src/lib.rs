#![forbid(unsafe_code)]
//! Hashing, filesystem, cancellation, and process helpers for cacheprobe.

pub mod cancel;
pub mod error;
pub mod fs;
pub mod hash;
pub mod process;

pub use cancel::Cancellation;
pub use error::UtilError;
