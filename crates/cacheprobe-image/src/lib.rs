//! Container image access for cacheprobe: references, manifests, a registry
//! client, and extraction of a single file from an image's layers.

#![forbid(unsafe_code)]

pub mod digest;
pub mod error;
pub mod locate;
pub mod manifest;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod reference;
pub mod registry;
pub mod source;

pub use digest::Digest;
pub use error::ImageError;
pub use locate::{extract_binary, locate_binary, LocatedBinary, BUILDER_BINARY_PATH};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{LayerBuilder, MemoryLayer, MemoryRegistry};
pub use reference::ImageReference;
pub use registry::RegistryClient;
pub use source::{Image, ImageSource};
