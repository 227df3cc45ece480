use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The cached-image configuration supplied by the caller.
///
/// Optional fields are `None` when the caller did not provide them; only
/// provided fields count as explicitly set when options are resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Builder image used when no cached image is found.
    pub builder_image: String,
    /// Registry repository checked for a previously built image.
    pub cache_repo: String,
    /// Git repository containing the devcontainer or Dockerfile.
    pub git_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image_cache_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_context_path: Option<String>,
    /// Build secrets as a map; turned into sorted `KEY=VALUE` items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_secrets: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devcontainer_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devcontainer_json_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_config_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_on_build_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_clone_depth: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_clone_single_branch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_http_proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ssh_private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ssh_private_key_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    /// Defaults to `true` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_repo_build_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<String>,

    /// Override map: sets options by their external name or passes
    /// arbitrary entries through to the computed environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_env: BTreeMap<String, String>,
}

impl Configuration {
    /// Create a configuration with only the three required fields set.
    pub fn new(builder_image: &str, cache_repo: &str, git_url: &str) -> Self {
        Self {
            builder_image: builder_image.to_owned(),
            cache_repo: cache_repo.to_owned(),
            git_url: git_url.to_owned(),
            ..Self::default()
        }
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, contains invalid TOML, or
    /// leaves a required field empty.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Parse a configuration from TOML text. `origin` names the source in errors.
    ///
    /// # Errors
    /// Returns an error if the text is invalid TOML or leaves a required field empty.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Configuration = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required field carries a value.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingField`] naming the first empty required field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("builder_image", &self.builder_image),
            ("cache_repo", &self.cache_repo),
            ("git_url", &self.git_url),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField { field });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("required field `{field}` is missing or empty")]
    MissingField { field: &'static str },
}
