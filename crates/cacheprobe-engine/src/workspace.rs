//! A per-pass scratch directory that is removed on every exit path.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::EngineError;

const PREFIX: &str = "cacheprobe-";

/// The build tool's working base, relative to the workspace root.
pub const KANIKO_DIR: &str = ".envbuilder";

/// Scratch space for one reconciliation pass.
///
/// Holds the extracted builder binary, the build tool's working base, and
/// the default clone target. Dropping it removes everything; a failed
/// removal is logged rather than raised.
#[derive(Debug)]
pub struct ScopedWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl ScopedWorkspace {
    /// Create a workspace under `parent`, or the system temp dir.
    ///
    /// # Errors
    /// Returns an error if the directory or its working base cannot be created.
    pub fn create(parent: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|source| EngineError::Workspace { source })?;

        let root = dir.path().to_path_buf();
        cacheprobe_util::fs::ensure_dir(&root.join(KANIKO_DIR))?;
        tracing::debug!(path = %root.display(), "created workspace");
        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Destination for the builder binary.
    pub fn binary_path(&self) -> PathBuf {
        self.root.join("bin").join("envbuilder")
    }

    pub fn kaniko_dir(&self) -> PathBuf {
        self.root.join(KANIKO_DIR)
    }

    /// Default workspace folder when the configuration names none.
    pub fn workspace_folder(&self) -> PathBuf {
        self.root.join("workspace")
    }
}

impl Drop for ScopedWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(err) = dir.close() {
                tracing::error!(path = %self.root.display(), error = %err, "failed to clean up workspace");
            } else {
                tracing::debug!(path = %self.root.display(), "removed workspace");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_under_root() {
        let parent = tempfile::tempdir().unwrap();
        let ws = ScopedWorkspace::create(Some(parent.path())).unwrap();

        assert!(ws.path().starts_with(parent.path()));
        assert!(ws.kaniko_dir().is_dir());
        assert!(ws.binary_path().starts_with(ws.path()));
        assert_eq!(ws.workspace_folder(), ws.path().join("workspace"));
    }

    #[test]
    fn drop_removes_everything() {
        let parent = tempfile::tempdir().unwrap();
        let ws = ScopedWorkspace::create(Some(parent.path())).unwrap();
        let root = ws.path().to_path_buf();
        std::fs::create_dir_all(ws.binary_path().parent().unwrap()).unwrap();
        std::fs::write(ws.binary_path(), b"bin").unwrap();

        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn missing_parent_is_an_error() {
        let result = ScopedWorkspace::create(Some(Path::new("/nonexistent/cacheprobe/parent")));
        assert!(matches!(result, Err(EngineError::Workspace { .. })));
    }
}
