//! An in-memory [`ImageSource`] with layer archives built in process.
//!
//! Every manifest request and layer open is recorded, so callers can assert
//! exactly which network operations a real registry would have seen.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Mutex;

use cacheprobe_util::Cancellation;

use crate::digest::Digest;
use crate::error::ImageError;
use crate::manifest::Compression;
use crate::reference::ImageReference;
use crate::source::{Image, ImageSource};

/// One stored layer blob.
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    blob: Vec<u8>,
    compression: Compression,
}

impl MemoryLayer {
    /// A plain tar layer.
    pub fn tar(archive: Vec<u8>) -> Self {
        Self {
            blob: archive,
            compression: Compression::None,
        }
    }

    /// A gzip-compressed tar layer.
    ///
    /// # Errors
    /// Returns an error if compression fails.
    pub fn gzip(archive: &[u8]) -> Result<Self, ImageError> {
        let io_err = |source| ImageError::Io {
            path: "<gzip layer>".to_owned(),
            source,
        };
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(archive).map_err(io_err)?;
        let blob = encoder.finish().map_err(io_err)?;
        Ok(Self {
            blob,
            compression: Compression::Gzip,
        })
    }
}

/// Builds a tar archive in memory.
pub struct LayerBuilder {
    builder: tar::Builder<Vec<u8>>,
}

impl Default for LayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerBuilder {
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    /// Add a regular file. `path` must be relative.
    ///
    /// # Errors
    /// Returns an error if tar rejects the path.
    pub fn file(self, path: &str, contents: &[u8]) -> Result<Self, ImageError> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        self.append(header, path, contents)
    }

    /// Add a directory entry.
    ///
    /// # Errors
    /// Returns an error if tar rejects the path.
    pub fn dir(self, path: &str) -> Result<Self, ImageError> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        self.append(header, path, std::io::empty())
    }

    /// Add a symbolic link pointing at `target`.
    ///
    /// # Errors
    /// Returns an error if tar rejects the path or the link target.
    pub fn symlink(self, path: &str, target: &str) -> Result<Self, ImageError> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_link_name(target).map_err(|source| tar_err(path, source))?;
        self.append(header, path, std::io::empty())
    }

    /// Finish the archive and return its bytes.
    ///
    /// # Errors
    /// Returns an error if the trailing blocks cannot be written.
    pub fn finish(self) -> Result<Vec<u8>, ImageError> {
        self.builder
            .into_inner()
            .map_err(|source| tar_err("<archive>", source))
    }

    fn append<R: Read>(
        mut self,
        mut header: tar::Header,
        path: &str,
        data: R,
    ) -> Result<Self, ImageError> {
        self.builder
            .append_data(&mut header, path, data)
            .map_err(|source| tar_err(path, source))?;
        Ok(self)
    }
}

fn tar_err(path: &str, source: std::io::Error) -> ImageError {
    ImageError::Io {
        path: path.to_owned(),
        source,
    }
}

#[derive(Debug, Clone)]
struct StoredImage {
    digest: Digest,
    layers: Vec<MemoryLayer>,
}

#[derive(Debug, Default)]
struct AccessLog {
    manifests: Vec<String>,
    layers: Vec<usize>,
}

/// An image registry held in memory.
///
/// References are normalized through [`ImageReference`], so `reg/cache` and
/// `docker.io/reg/cache` name the same image.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    images: BTreeMap<String, StoredImage>,
    failures: BTreeMap<String, u16>,
    log: Mutex<AccessLog>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an image under `reference` and under its digest-pinned form.
    /// Returns the image digest, derived from the layer contents.
    ///
    /// # Errors
    /// Returns an error if `reference` does not parse.
    pub fn add_image(
        &mut self,
        reference: &str,
        layers: Vec<MemoryLayer>,
    ) -> Result<Digest, ImageError> {
        let parsed = ImageReference::parse(reference)?;
        let mut fingerprint = String::new();
        for layer in &layers {
            fingerprint.push_str(Digest::of_bytes(&layer.blob).as_str());
        }
        let digest = Digest::of_bytes(fingerprint.as_bytes());
        let stored = StoredImage {
            digest: digest.clone(),
            layers,
        };
        self.images
            .insert(parsed.with_digest(digest.clone()).to_string(), stored.clone());
        self.images.insert(parsed.to_string(), stored);
        Ok(digest)
    }

    /// Forget an image, as if it had been garbage collected.
    pub fn remove(&mut self, reference: &str) {
        if let Ok(parsed) = ImageReference::parse(reference) {
            self.images.remove(&parsed.to_string());
        }
    }

    /// Answer every request for `reference` with HTTP `status`.
    pub fn fail_with(&mut self, reference: &str, status: u16) {
        if let Ok(parsed) = ImageReference::parse(reference) {
            self.failures.insert(parsed.to_string(), status);
        }
    }

    /// References whose manifest was requested, in order.
    pub fn manifest_requests(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|log| log.manifests.clone())
            .unwrap_or_default()
    }

    /// Indices of the layers that were opened, in order.
    pub fn opened_layers(&self) -> Vec<usize> {
        self.log
            .lock()
            .map(|log| log.layers.clone())
            .unwrap_or_default()
    }

    fn lookup(&self, reference: &str, cancel: &Cancellation) -> Result<&StoredImage, ImageError> {
        cancel.check()?;
        let key = ImageReference::parse(reference)?.to_string();
        if let Ok(mut log) = self.log.lock() {
            log.manifests.push(key.clone());
        }
        if let Some(status) = self.failures.get(&key) {
            return Err(ImageError::Registry {
                reference: key,
                status: *status,
                code: None,
                message: "injected failure".to_owned(),
            });
        }
        self.images.get(&key).ok_or_else(|| ImageError::Registry {
            reference: key,
            status: 404,
            code: Some("MANIFEST_UNKNOWN".to_owned()),
            message: "manifest unknown".to_owned(),
        })
    }
}

impl ImageSource for MemoryRegistry {
    fn fetch_digest(&self, reference: &str, cancel: &Cancellation) -> Result<Digest, ImageError> {
        Ok(self.lookup(reference, cancel)?.digest.clone())
    }

    fn fetch_image<'a>(
        &'a self,
        reference: &str,
        cancel: &Cancellation,
    ) -> Result<Box<dyn Image + 'a>, ImageError> {
        let image = self.lookup(reference, cancel)?;
        Ok(Box::new(MemoryImage {
            image,
            log: &self.log,
        }))
    }
}

struct MemoryImage<'a> {
    image: &'a StoredImage,
    log: &'a Mutex<AccessLog>,
}

impl Image for MemoryImage<'_> {
    fn digest(&self) -> &Digest {
        &self.image.digest
    }

    fn layer_count(&self) -> usize {
        self.image.layers.len()
    }

    fn open_layer(&self, index: usize) -> Result<Box<dyn Read + '_>, ImageError> {
        let layer = self.image.layers.get(index).ok_or(ImageError::LayerIndex {
            index,
            count: self.image.layers.len(),
        })?;
        if let Ok(mut log) = self.log.lock() {
            log.layers.push(index);
        }
        let blob = layer.blob.as_slice();
        Ok(match layer.compression {
            Compression::None => Box::new(blob),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(blob)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn layer(path: &str, contents: &[u8]) -> MemoryLayer {
        MemoryLayer::tar(LayerBuilder::new().file(path, contents).unwrap().finish().unwrap())
    }

    #[test]
    fn image_is_reachable_by_tag_and_digest() {
        let mut registry = MemoryRegistry::new();
        let digest = registry
            .add_image("reg.local/cache:latest", vec![layer("a", b"1")])
            .unwrap();
        let cancel = Cancellation::new();

        assert_eq!(registry.fetch_digest("reg.local/cache:latest", &cancel).unwrap(), digest);
        let pinned = format!("reg.local/cache@{digest}");
        assert_eq!(registry.fetch_digest(&pinned, &cancel).unwrap(), digest);
        assert_eq!(registry.manifest_requests().len(), 2);
    }

    #[test]
    fn unknown_image_is_not_found() {
        let registry = MemoryRegistry::new();
        let err = registry
            .fetch_digest("reg.local/missing", &Cancellation::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn injected_failure_is_transient() {
        let mut registry = MemoryRegistry::new();
        registry.add_image("reg.local/cache", vec![]).unwrap();
        registry.fail_with("reg.local/cache", 503);
        let err = registry
            .fetch_digest("reg.local/cache", &Cancellation::new())
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn cancelled_lookup_does_not_reach_registry() {
        let registry = MemoryRegistry::new();
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = registry.fetch_digest("reg.local/cache", &cancel).unwrap_err();
        assert!(err.is_cancellation());
        assert!(registry.manifest_requests().is_empty());
    }

    #[test]
    fn gzip_layers_read_back_as_tar() {
        let archive = LayerBuilder::new().file("etc/motd", b"hi").unwrap().finish().unwrap();
        let mut registry = MemoryRegistry::new();
        registry
            .add_image("reg.local/img", vec![MemoryLayer::gzip(&archive).unwrap()])
            .unwrap();

        let image = registry
            .fetch_image("reg.local/img", &Cancellation::new())
            .unwrap();
        let mut tar_bytes = Vec::new();
        image.open_layer(0).unwrap().read_to_end(&mut tar_bytes).unwrap();
        assert_eq!(tar_bytes, archive);
        assert!(matches!(
            image.open_layer(1),
            Err(ImageError::LayerIndex { index: 1, count: 1 })
        ));
    }
}
