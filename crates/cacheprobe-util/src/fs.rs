//! Filesystem utilities for cacheprobe.

use std::path::Path;

use crate::error::UtilError;

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Remove a file. No error if the file is absent.
///
/// # Errors
/// Returns an error if the file exists but cannot be removed.
pub fn remove_file_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UtilError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Set `path` to mode 0755: read and execute for everyone, write for the owner.
///
/// A no-op on platforms without Unix permission bits.
///
/// # Errors
/// Returns an error if the permissions cannot be changed.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<(), UtilError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|source| {
        UtilError::Io {
            path: path.display().to_string(),
            source,
        }
    })
}

/// Set `path` to mode 0755: read and execute for everyone, write for the owner.
///
/// A no-op on platforms without Unix permission bits.
///
/// # Errors
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<(), UtilError> {
    Ok(())
}
