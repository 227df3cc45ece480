//! OCI and Docker v2 manifest documents.

use serde::Deserialize;

use crate::error::ImageError;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Media types sent in the `Accept` header of manifest requests.
pub const ACCEPTED_MANIFESTS: [&str; 4] =
    [OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST];

/// A manifest or an index. Which one is decided by [`Manifest::is_index`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl Manifest {
    /// Parse a manifest body. `reference` names the source in errors.
    ///
    /// # Errors
    /// Returns [`ImageError::InvalidManifest`] if the body is not valid JSON
    /// of the expected shape.
    pub fn from_json(body: &[u8], reference: &str) -> Result<Self, ImageError> {
        serde_json::from_slice(body).map_err(|source| ImageError::InvalidManifest {
            reference: reference.to_owned(),
            source,
        })
    }

    /// `content_type` is the response's Content-Type, used when the body
    /// itself does not carry a media type.
    pub fn is_index(&self, content_type: Option<&str>) -> bool {
        let media_type = self.media_type.as_deref().or(content_type);
        match media_type {
            Some(OCI_INDEX | DOCKER_MANIFEST_LIST) => true,
            Some(_) => false,
            None => !self.manifests.is_empty() && self.layers.is_empty(),
        }
    }

    /// The index entry for `os`/`architecture`, ignoring variants.
    pub fn platform_entry(&self, os: &str, architecture: &str) -> Option<&Descriptor> {
        self.manifests.iter().find(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| p.os == os && p.architecture == architecture)
        })
    }
}

/// How a layer blob is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Classify a layer media type.
    ///
    /// # Errors
    /// Returns [`ImageError::UnsupportedMediaType`] for zstd or unknown layer types.
    pub fn of_layer(media_type: &str) -> Result<Self, ImageError> {
        match media_type {
            "application/vnd.oci.image.layer.v1.tar"
            | "application/vnd.oci.image.layer.nondistributable.v1.tar" => Ok(Self::None),
            "application/vnd.oci.image.layer.v1.tar+gzip"
            | "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip"
            | "application/vnd.docker.image.rootfs.diff.tar.gzip"
            | "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip" => Ok(Self::Gzip),
            other => Err(ImageError::UnsupportedMediaType {
                media_type: other.to_owned(),
            }),
        }
    }
}

/// The `(os, architecture)` pair to pick from an index on this host.
pub fn host_platform() -> (&'static str, &'static str) {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    };
    ("linux", arch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {"mediaType": "application/vnd.oci.image.manifest.v1+json",
             "digest": "sha256:aaaa", "size": 10,
             "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json",
             "digest": "sha256:bbbb", "size": 10,
             "platform": {"architecture": "amd64", "os": "linux"}}
        ]
    }"#;

    const IMAGE: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {"mediaType": "application/vnd.docker.container.image.v1+json",
                   "digest": "sha256:cccc", "size": 5},
        "layers": [
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
             "digest": "sha256:dddd", "size": 100}
        ]
    }"#;

    #[test]
    fn index_entries_are_selected_by_platform() {
        let index = Manifest::from_json(INDEX.as_bytes(), "r").unwrap();
        assert!(index.is_index(None));
        assert_eq!(index.platform_entry("linux", "amd64").unwrap().digest, "sha256:bbbb");
        assert_eq!(index.platform_entry("linux", "arm64").unwrap().digest, "sha256:aaaa");
        assert!(index.platform_entry("linux", "s390x").is_none());
    }

    #[test]
    fn image_manifest_lists_layers() {
        let image = Manifest::from_json(IMAGE.as_bytes(), "r").unwrap();
        assert!(!image.is_index(None));
        assert_eq!(image.layers.len(), 1);
        assert_eq!(
            Compression::of_layer(&image.layers.first().unwrap().media_type).unwrap(),
            Compression::Gzip
        );
    }

    #[test]
    fn content_type_decides_when_body_is_silent() {
        let bare = Manifest::from_json(br#"{"schemaVersion": 2, "manifests": []}"#, "r").unwrap();
        assert!(bare.is_index(Some(DOCKER_MANIFEST_LIST)));
        assert!(!bare.is_index(Some(OCI_MANIFEST)));
    }

    #[test]
    fn zstd_layers_are_unsupported() {
        assert!(matches!(
            Compression::of_layer("application/vnd.oci.image.layer.v1.tar+zstd"),
            Err(ImageError::UnsupportedMediaType { .. })
        ));
        assert_eq!(
            Compression::of_layer("application/vnd.oci.image.layer.v1.tar").unwrap(),
            Compression::None
        );
    }

    #[test]
    fn garbage_is_an_invalid_manifest() {
        assert!(matches!(
            Manifest::from_json(b"<html>", "reg/cache:latest"),
            Err(ImageError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn host_platform_is_linux() {
        assert_eq!(host_platform().0, "linux");
    }
}
