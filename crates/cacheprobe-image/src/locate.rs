//! Finding and extracting a single file from an image's layers.

use std::fs::File;
use std::path::{Path, PathBuf};

use cacheprobe_util::{fs, hash, Cancellation};

use crate::error::ImageError;
use crate::source::{Image, ImageSource};

/// Where the builder image keeps the build tool.
pub const BUILDER_BINARY_PATH: &str = "/.envbuilder/bin/envbuilder";

/// A file extracted from an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedBinary {
    pub path: PathBuf,
    /// Hex SHA-256 of the extracted file.
    pub sha256: String,
    /// Index of the layer it came from, `0` being the oldest.
    pub layer_index: usize,
}

/// Lexically clean a slash-separated archive path and drop any leading `/`.
///
/// `.` segments and repeated separators vanish, and `..` removes the segment
/// before it. A `..` at the top is dropped, as it would be for a rooted path.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Fetch `reference` from `source` and extract `target` to `dest`.
///
/// # Errors
/// See [`extract_binary`]; fetching the image adds the source's errors.
pub fn locate_binary(
    source: &dyn ImageSource,
    reference: &str,
    target: &str,
    dest: &Path,
    cancel: &Cancellation,
) -> Result<LocatedBinary, ImageError> {
    let image = source.fetch_image(reference, cancel)?;
    tracing::debug!(reference, digest = %image.digest(), layers = image.layer_count(), "scanning image");
    extract_binary(&*image, reference, target, dest, cancel)
}

/// Scan the layers of `image` newest first and copy the first regular file
/// at `target` to `dest`, marking it executable.
///
/// Scanning stops at the first match, so older layers are never opened once
/// the file has been found.
///
/// # Errors
/// Returns [`ImageError::BinaryNotFound`] if no layer holds a regular file at
/// `target`, a layer or I/O error if reading or writing fails, or the
/// cancellation error if the pass is cancelled mid-scan.
pub fn extract_binary(
    image: &dyn Image,
    reference: &str,
    target: &str,
    dest: &Path,
    cancel: &Cancellation,
) -> Result<LocatedBinary, ImageError> {
    let wanted = clean_path(target);
    let count = image.layer_count();

    for index in (0..count).rev() {
        cancel.check()?;
        let layer_idx = index + 1;
        // A stream cut off by cancellation reports the cancellation itself.
        let layer_err = |source| match cancel.check() {
            Err(stop) => ImageError::Util(stop),
            Ok(()) => ImageError::Layer { index, source },
        };

        let reader = image.open_layer(index)?;
        let mut archive = tar::Archive::new(reader);
        let entries = archive.entries().map_err(layer_err)?;

        for entry in entries {
            let mut entry = entry.map_err(layer_err)?;
            let name = clean_path(&entry.path().map_err(layer_err)?.to_string_lossy());

            if !entry.header().entry_type().is_file() {
                tracing::debug!(name = %name, layer_idx, "skip non-regular file");
                continue;
            }
            if name != wanted {
                tracing::debug!(name = %name, layer_idx, "skip file");
                continue;
            }

            tracing::debug!(name = %name, layer_idx, "found file");
            if let Some(parent) = dest.parent() {
                fs::ensure_dir(parent)?;
            }
            let mut out = File::create(dest).map_err(|source| io_err(dest, source))?;
            std::io::copy(&mut entry, &mut out).map_err(|source| io_err(dest, source))?;
            drop(out);
            fs::set_executable(dest)?;

            let sha256 = hash::sha256_file(dest)?;
            tracing::info!(path = %dest.display(), sha256 = %sha256, layer_idx, "extracted binary");
            return Ok(LocatedBinary {
                path: dest.to_path_buf(),
                sha256,
                layer_index: index,
            });
        }
    }

    Err(ImageError::BinaryNotFound {
        reference: reference.to_owned(),
        path: format!("/{wanted}"),
    })
}

fn io_err(path: &Path, source: std::io::Error) -> ImageError {
    ImageError::Io {
        path: path.display().to_string(),
        source,
    }
}
