//! Error types for cacheprobe-image.

use cacheprobe_util::UtilError;

/// Registry error codes that mean the requested object does not exist.
const NOT_FOUND_CODES: [&str; 3] = ["MANIFEST_UNKNOWN", "NAME_UNKNOWN", "BLOB_UNKNOWN"];

/// Errors produced while reading images.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// The image reference cannot be parsed.
    #[error("invalid image reference \"{reference}\": {message}")]
    InvalidReference { reference: String, message: String },

    /// The digest is not of the form `sha256:<64 hex>`.
    #[error("invalid digest \"{digest}\"")]
    InvalidDigest { digest: String },

    /// The registry answered with a non-success status. `code` is the first
    /// distribution error code in the body, if any.
    #[error("registry error for {reference}: HTTP {status}: {message}")]
    Registry {
        reference: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The request never produced a response.
    #[error("cannot reach registry for {reference}: {message}")]
    Transport { reference: String, message: String },

    /// An anonymous token could not be obtained.
    #[error("cannot authenticate to registry for {reference}: {message}")]
    Auth { reference: String, message: String },

    /// The manifest body is not a valid manifest.
    #[error("invalid manifest for {reference}: {source}")]
    InvalidManifest {
        reference: String,
        source: serde_json::Error,
    },

    /// An index lists no manifest for the host platform.
    #[error("no manifest for platform {platform} in {reference}")]
    NoMatchingPlatform { reference: String, platform: String },

    /// A manifest or layer media type this client cannot read.
    #[error("unsupported media type \"{media_type}\"")]
    UnsupportedMediaType { media_type: String },

    /// A layer index past the end of the layer list.
    #[error("layer {index} out of range, image has {count} layer(s)")]
    LayerIndex { index: usize, count: usize },

    /// A layer archive could not be read.
    #[error("cannot read layer {index}: {source}")]
    Layer {
        index: usize,
        source: std::io::Error,
    },

    /// No layer contains a regular file at the requested path.
    #[error("binary not found in image: no layer of {reference} contains {path}")]
    BinaryNotFound { reference: String, path: String },

    /// The binary was found but could not be written locally.
    #[error("cannot write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// An error propagated from cacheprobe-util.
    #[error("{0}")]
    Util(#[from] UtilError),
}

impl ImageError {
    /// Whether the error means the object does not exist, as opposed to a
    /// failure to find out.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Registry { status, code, .. } => {
                *status == 404
                    || code
                        .as_deref()
                        .is_some_and(|c| NOT_FOUND_CODES.contains(&c))
            }
            Self::BinaryNotFound { .. } => true,
            _ => false,
        }
    }

    /// Whether the error is the pass being cancelled or running out of time.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Util(e) if e.is_cancellation())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn registry(status: u16, code: Option<&str>) -> ImageError {
        ImageError::Registry {
            reference: "reg/cache@sha256:abc".to_owned(),
            status,
            code: code.map(str::to_owned),
            message: "nope".to_owned(),
        }
    }

    #[test]
    fn manifest_unknown_is_not_found() {
        assert!(registry(404, None).is_not_found());
        assert!(registry(400, Some("MANIFEST_UNKNOWN")).is_not_found());
        assert!(registry(404, Some("NAME_UNKNOWN")).is_not_found());
    }

    #[test]
    fn other_failures_are_not_not_found() {
        assert!(!registry(500, None).is_not_found());
        assert!(!registry(401, Some("UNAUTHORIZED")).is_not_found());
        assert!(!ImageError::Transport {
            reference: "r".to_owned(),
            message: "connection refused".to_owned(),
        }
        .is_not_found());
    }

    #[test]
    fn cancellation_is_recognised() {
        assert!(ImageError::Util(UtilError::Cancelled).is_cancellation());
        assert!(ImageError::Util(UtilError::DeadlineExceeded {
            timeout: Duration::from_secs(1)
        })
        .is_cancellation());
        assert!(!registry(500, None).is_cancellation());
    }

    #[test]
    fn registry_message_includes_status() {
        let message = registry(404, Some("MANIFEST_UNKNOWN")).to_string();
        assert!(message.contains("HTTP 404: nope"), "{message}");
    }
}
