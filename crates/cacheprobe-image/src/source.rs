//! The image-read contract shared by the registry client and test doubles.

use std::io::Read;

use cacheprobe_util::Cancellation;

use crate::digest::Digest;
use crate::error::ImageError;

/// Somewhere images can be read from.
pub trait ImageSource {
    /// Resolve `reference` to the digest of its (platform) manifest without
    /// touching any layer.
    ///
    /// # Errors
    /// Returns an error for which [`ImageError::is_not_found`] holds when the
    /// manifest does not exist, and any other error when existence could not
    /// be determined.
    fn fetch_digest(&self, reference: &str, cancel: &Cancellation) -> Result<Digest, ImageError>;

    /// Open the image behind `reference` for layer access.
    ///
    /// # Errors
    /// Same classes as [`ImageSource::fetch_digest`].
    fn fetch_image<'a>(
        &'a self,
        reference: &str,
        cancel: &Cancellation,
    ) -> Result<Box<dyn Image + 'a>, ImageError>;
}

/// An image whose layers can be read one at a time.
pub trait Image {
    fn digest(&self) -> &Digest;

    /// Number of layers, oldest first.
    fn layer_count(&self) -> usize;

    /// An uncompressed tar stream of layer `index`, `0` being the oldest.
    ///
    /// # Errors
    /// Returns [`ImageError::LayerIndex`] for an out-of-range index, or the
    /// error raised while opening the layer blob.
    fn open_layer(&self, index: usize) -> Result<Box<dyn Read + '_>, ImageError>;
}
