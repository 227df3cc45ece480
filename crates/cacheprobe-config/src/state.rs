use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Identifier recorded when no cached image was found.
pub const NIL_ID: &str = "00000000-0000-0000-0000-000000000000";

/// The persisted outcome of a reconciliation pass.
///
/// `exists == false` always pairs with `image` equal to the builder image and
/// `id` equal to [`NIL_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Manifest digest of the cached image, or [`NIL_ID`].
    pub id: String,
    /// Whether a cached image satisfying the configuration was found.
    pub exists: bool,
    /// `cache_repo@digest` on a hit, the builder image on a miss.
    pub image: String,
    /// Computed environment as sorted `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Computed environment as a map.
    pub env_map: BTreeMap<String, String>,
}

impl ResourceState {
    /// Read a state file. Returns `None` if the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Option<Self>, StateError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| StateError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let state: ResourceState = toml::from_str(&content).map_err(|e| StateError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Some(state))
    }

    /// Write the state to disk as TOML.
    ///
    /// Uses atomic write (write-to-temp-then-rename) so a crash never leaves a
    /// half-written state behind.
    ///
    /// # Errors
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<(), StateError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StateError::Serialize { source: e })?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &content).map_err(|e| StateError::Write {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| StateError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid state file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("cannot serialize state: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn miss(builder: &str) -> ResourceState {
        let env_map = BTreeMap::from([("FOO".to_owned(), "bar\nbaz".to_owned())]);
        ResourceState {
            id: NIL_ID.to_owned(),
            exists: false,
            image: builder.to_owned(),
            env: vec!["FOO=bar\nbaz".to_owned()],
            env_map,
        }
    }

    #[test]
    fn absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let state = ResourceState::from_path(&dir.path().join("state.toml"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(state.is_none());
    }

    #[test]
    fn write_then_read_preserves_embedded_newlines() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("state.toml");

        let original = miss("envbuilder:latest");
        original.write_to(&path).unwrap_or_else(|e| panic!("{e}"));
        let reparsed = ResourceState::from_path(&path)
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("state missing after write"));
        assert_eq!(original, reparsed);
    }

    #[test]
    fn write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("state.toml");
        miss("envbuilder:latest")
            .write_to(&path)
            .unwrap_or_else(|e| panic!("{e}"));

        assert!(path.exists());
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "id = [").unwrap_or_else(|e| panic!("{e}"));

        assert!(matches!(
            ResourceState::from_path(&path),
            Err(StateError::Parse { .. })
        ));
    }

    proptest! {
        #[test]
        fn arbitrary_env_values_survive_persistence(
            entries in proptest::collection::btree_map("[A-Z_]{1,12}", "\\PC{0,40}", 0..8),
        ) {
            let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
            let path = dir.path().join("state.toml");
            let env = entries.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let state = ResourceState {
                id: "sha256:abc".to_owned(),
                exists: true,
                image: "reg/cache@sha256:abc".to_owned(),
                env,
                env_map: entries,
            };

            state.write_to(&path).unwrap_or_else(|e| panic!("{e}"));
            let reparsed = ResourceState::from_path(&path).unwrap_or_else(|e| panic!("{e}"));
            prop_assert_eq!(Some(state), reparsed);
        }
    }
}
