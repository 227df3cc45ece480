use std::fmt;

use cacheprobe_util::hash::sha256_bytes;

use crate::error::ImageError;

/// A content digest of the form `sha256:<64 lowercase hex>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string.
    ///
    /// # Errors
    /// Returns [`ImageError::InvalidDigest`] unless `s` is a SHA-256 digest.
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        let valid = s.strip_prefix("sha256:").is_some_and(|hex| {
            hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        });
        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(ImageError::InvalidDigest {
                digest: s.to_owned(),
            })
        }
    }

    /// Digest of a byte string.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(format!("sha256:{}", sha256_bytes(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
