//! Image reference parsing: `[registry/]repository[:tag][@digest]`.

use std::fmt;

use crate::digest::Digest;
use crate::error::ImageError;

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_API: &str = "registry-1.docker.io";
const DEFAULT_TAG: &str = "latest";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse a reference, applying Docker Hub defaults for the registry and
    /// the `library/` name space.
    ///
    /// # Errors
    /// Returns [`ImageError::InvalidReference`] if the repository is empty or
    /// contains characters a registry would reject, and
    /// [`ImageError::InvalidDigest`] for a malformed `@digest` suffix.
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        let invalid = |message: &str| ImageError::InvalidReference {
            reference: s.to_owned(),
            message: message.to_owned(),
        };

        let (name_tag, digest) = match s.split_once('@') {
            Some((name, digest)) => (name, Some(Digest::parse(digest)?)),
            None => (s, None),
        };

        let last_slash = name_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_tag.rfind(':') {
            Some(colon) if colon >= last_slash => {
                let (name, tag) = name_tag.split_at(colon);
                (name, tag.strip_prefix(':'))
            }
            _ => (name_tag, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first, rest.to_owned())
            }
            _ => (DOCKER_HUB, name.to_owned()),
        };
        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository name"));
        }
        let valid_repo = repository
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' | b'/'));
        if !valid_repo {
            return Err(invalid("repository must be lowercase alphanumerics and separators"));
        }
        if tag.is_some_and(str::is_empty) {
            return Err(invalid("empty tag"));
        }

        Ok(Self {
            registry: registry.to_owned(),
            repository,
            tag: tag.map(str::to_owned),
            digest,
        })
    }

    /// Host to send API requests to.
    pub fn api_host(&self) -> &str {
        if self.registry == DOCKER_HUB {
            DOCKER_HUB_API
        } else {
            &self.registry
        }
    }

    /// `http` for loopback registries, `https` otherwise.
    pub fn scheme(&self) -> &'static str {
        let host = match self.registry.strip_prefix('[') {
            Some(v6) => v6.split(']').next().unwrap_or(v6),
            None => self.registry.split(':').next().unwrap_or(&self.registry),
        };
        if host == "localhost" || host == "::1" || host.starts_with("127.") {
            "http"
        } else {
            "https"
        }
    }

    /// The tag or digest to put in a manifest URL. A digest wins over a tag.
    pub fn manifest_ref(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_owned(),
        }
    }

    /// Base URL of this repository's distribution API.
    pub fn api_base(&self) -> String {
        format!("{}://{}/v2/{}", self.scheme(), self.api_host(), self.repository)
    }

    /// A reference to the same repository pinned to `digest`.
    pub fn with_digest(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn bare_name_uses_docker_hub_defaults() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag, None);
        assert_eq!(r.manifest_ref(), "latest");
        assert_eq!(r.api_base(), "https://registry-1.docker.io/v2/library/alpine");
    }

    #[test]
    fn registry_with_port_and_tag() {
        let r = ImageReference::parse("localhost:5000/cache/envbuilder:v1.2").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "cache/envbuilder");
        assert_eq!(r.tag.as_deref(), Some("v1.2"));
        assert_eq!(r.scheme(), "http");
        assert_eq!(r.to_string(), "localhost:5000/cache/envbuilder:v1.2");
    }

    #[test]
    fn digest_wins_over_tag() {
        let r = ImageReference::parse(&format!("ghcr.io/coder/envbuilder:latest@{DIGEST}")).unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.scheme(), "https");
        assert_eq!(r.manifest_ref(), DIGEST);
    }

    #[test]
    fn user_repo_on_docker_hub_keeps_namespace() {
        let r = ImageReference::parse("coder/envbuilder:1").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "coder/envbuilder");
    }

    #[test]
    fn loopback_hosts_use_http() {
        for reference in ["127.0.0.1:5000/x", "[::1]:5000/x", "localhost/x"] {
            assert_eq!(ImageReference::parse(reference).unwrap().scheme(), "http", "{reference}");
        }
    }

    #[test]
    fn with_digest_drops_tag() {
        let r = ImageReference::parse("reg.local/cache:tag").unwrap();
        let pinned = r.with_digest(Digest::parse(DIGEST).unwrap());
        assert_eq!(pinned.to_string(), format!("reg.local/cache@{DIGEST}"));
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", "reg.local/", "Upper/Case", "alpine:", "a//b", "x@sha256:nothex"] {
            assert!(ImageReference::parse(bad).is_err(), "{bad}");
        }
    }
}
