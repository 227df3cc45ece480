//! The build option table: every option's external name, kind, and typed slot.
//!
//! Options are addressed by [`OptionKey`]. [`BuildOptions::slot`] and
//! [`BuildOptions::slot_mut`] map a key to a tagged reference into the
//! matching field, so parsing and rendering dispatch on the variant instead of
//! on run-time type checks.

use std::fmt;
use std::num::ParseIntError;

/// Name space shared by every non-legacy option.
pub const NAMESPACE: &str = "ENVBUILDER_";

/// Value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    String,
    StringList,
}

/// Identifies one build option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKey {
    BaseImageCacheDir,
    BinaryPath,
    BuildContextPath,
    BuildSecrets,
    CacheRepo,
    CacheTtlDays,
    CoderAgentSubsystem,
    CoderAgentToken,
    CoderAgentUrl,
    DevcontainerDir,
    DevcontainerJsonPath,
    DockerConfigBase64,
    DockerfilePath,
    ExitOnBuildFailure,
    ExportEnvFile,
    FallbackImage,
    ForceSafe,
    GetCachedImage,
    GitCloneDepth,
    GitCloneSingleBranch,
    GitHttpProxyUrl,
    GitPassword,
    GitSshPrivateKeyBase64,
    GitSshPrivateKeyPath,
    GitUrl,
    GitUsername,
    IgnorePaths,
    InitArgs,
    InitCommand,
    InitScript,
    Insecure,
    LayerCacheDir,
    PostStartScriptPath,
    PushImage,
    RemoteRepoBuildMode,
    SetupScript,
    SkipRebuild,
    SslCertBase64,
    Verbose,
    WorkspaceFolder,
}

impl OptionKey {
    /// Every option, in external-name order.
    pub const ALL: [OptionKey; 40] = [
        Self::BaseImageCacheDir,
        Self::BinaryPath,
        Self::BuildContextPath,
        Self::BuildSecrets,
        Self::CacheRepo,
        Self::CacheTtlDays,
        Self::CoderAgentSubsystem,
        Self::CoderAgentToken,
        Self::CoderAgentUrl,
        Self::DevcontainerDir,
        Self::DevcontainerJsonPath,
        Self::DockerConfigBase64,
        Self::DockerfilePath,
        Self::ExitOnBuildFailure,
        Self::ExportEnvFile,
        Self::FallbackImage,
        Self::ForceSafe,
        Self::GetCachedImage,
        Self::GitCloneDepth,
        Self::GitCloneSingleBranch,
        Self::GitHttpProxyUrl,
        Self::GitPassword,
        Self::GitSshPrivateKeyBase64,
        Self::GitSshPrivateKeyPath,
        Self::GitUrl,
        Self::GitUsername,
        Self::IgnorePaths,
        Self::InitArgs,
        Self::InitCommand,
        Self::InitScript,
        Self::Insecure,
        Self::LayerCacheDir,
        Self::PostStartScriptPath,
        Self::PushImage,
        Self::RemoteRepoBuildMode,
        Self::SetupScript,
        Self::SkipRebuild,
        Self::SslCertBase64,
        Self::Verbose,
        Self::WorkspaceFolder,
    ];

    /// The stable external (environment variable) name.
    pub fn env_name(self) -> &'static str {
        match self {
            Self::BaseImageCacheDir => "ENVBUILDER_BASE_IMAGE_CACHE_DIR",
            Self::BinaryPath => "ENVBUILDER_BINARY_PATH",
            Self::BuildContextPath => "ENVBUILDER_BUILD_CONTEXT_PATH",
            Self::BuildSecrets => "ENVBUILDER_BUILD_SECRETS",
            Self::CacheRepo => "ENVBUILDER_CACHE_REPO",
            Self::CacheTtlDays => "ENVBUILDER_CACHE_TTL_DAYS",
            Self::CoderAgentSubsystem => "CODER_AGENT_SUBSYSTEM",
            Self::CoderAgentToken => "CODER_AGENT_TOKEN",
            Self::CoderAgentUrl => "CODER_AGENT_URL",
            Self::DevcontainerDir => "ENVBUILDER_DEVCONTAINER_DIR",
            Self::DevcontainerJsonPath => "ENVBUILDER_DEVCONTAINER_JSON_PATH",
            Self::DockerConfigBase64 => "ENVBUILDER_DOCKER_CONFIG_BASE64",
            Self::DockerfilePath => "ENVBUILDER_DOCKERFILE_PATH",
            Self::ExitOnBuildFailure => "ENVBUILDER_EXIT_ON_BUILD_FAILURE",
            Self::ExportEnvFile => "ENVBUILDER_EXPORT_ENV_FILE",
            Self::FallbackImage => "ENVBUILDER_FALLBACK_IMAGE",
            Self::ForceSafe => "ENVBUILDER_FORCE_SAFE",
            Self::GetCachedImage => "ENVBUILDER_GET_CACHED_IMAGE",
            Self::GitCloneDepth => "ENVBUILDER_GIT_CLONE_DEPTH",
            Self::GitCloneSingleBranch => "ENVBUILDER_GIT_CLONE_SINGLE_BRANCH",
            Self::GitHttpProxyUrl => "ENVBUILDER_GIT_HTTP_PROXY_URL",
            Self::GitPassword => "ENVBUILDER_GIT_PASSWORD",
            Self::GitSshPrivateKeyBase64 => "ENVBUILDER_GIT_SSH_PRIVATE_KEY_BASE64",
            Self::GitSshPrivateKeyPath => "ENVBUILDER_GIT_SSH_PRIVATE_KEY_PATH",
            Self::GitUrl => "ENVBUILDER_GIT_URL",
            Self::GitUsername => "ENVBUILDER_GIT_USERNAME",
            Self::IgnorePaths => "ENVBUILDER_IGNORE_PATHS",
            Self::InitArgs => "ENVBUILDER_INIT_ARGS",
            Self::InitCommand => "ENVBUILDER_INIT_COMMAND",
            Self::InitScript => "ENVBUILDER_INIT_SCRIPT",
            Self::Insecure => "ENVBUILDER_INSECURE",
            Self::LayerCacheDir => "ENVBUILDER_LAYER_CACHE_DIR",
            Self::PostStartScriptPath => "ENVBUILDER_POST_START_SCRIPT_PATH",
            Self::PushImage => "ENVBUILDER_PUSH_IMAGE",
            Self::RemoteRepoBuildMode => "ENVBUILDER_REMOTE_REPO_BUILD_MODE",
            Self::SetupScript => "ENVBUILDER_SETUP_SCRIPT",
            Self::SkipRebuild => "ENVBUILDER_SKIP_REBUILD",
            Self::SslCertBase64 => "ENVBUILDER_SSL_CERT_BASE64",
            Self::Verbose => "ENVBUILDER_VERBOSE",
            Self::WorkspaceFolder => "ENVBUILDER_WORKSPACE_FOLDER",
        }
    }

    /// Look up an option by its external name. Matching is case-sensitive.
    pub fn from_env_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.env_name() == name)
    }

    /// Legacy options predate the name space and are never derived into the
    /// computed environment.
    pub fn is_legacy(self) -> bool {
        !self.env_name().starts_with(NAMESPACE)
    }

    /// The value type of this option.
    pub fn kind(self) -> OptionKind {
        BuildOptions::default().slot(self).kind()
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_name())
    }
}

/// The canonical option set handed to the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub base_image_cache_dir: String,
    pub binary_path: String,
    pub build_context_path: String,
    pub build_secrets: Vec<String>,
    pub cache_repo: String,
    pub cache_ttl_days: i64,
    pub coder_agent_subsystem: Vec<String>,
    pub coder_agent_token: String,
    pub coder_agent_url: String,
    pub devcontainer_dir: String,
    pub devcontainer_json_path: String,
    pub docker_config_base64: String,
    pub dockerfile_path: String,
    pub exit_on_build_failure: bool,
    pub export_env_file: String,
    pub fallback_image: String,
    pub force_safe: bool,
    pub get_cached_image: bool,
    pub git_clone_depth: i64,
    pub git_clone_single_branch: bool,
    pub git_http_proxy_url: String,
    pub git_password: String,
    pub git_ssh_private_key_base64: String,
    pub git_ssh_private_key_path: String,
    pub git_url: String,
    pub git_username: String,
    pub ignore_paths: Vec<String>,
    pub init_args: String,
    pub init_command: String,
    pub init_script: String,
    pub insecure: bool,
    pub layer_cache_dir: String,
    pub post_start_script_path: String,
    pub push_image: bool,
    pub remote_repo_build_mode: bool,
    pub setup_script: String,
    pub skip_rebuild: bool,
    pub ssl_cert_base64: String,
    pub verbose: bool,
    pub workspace_folder: String,
}

impl BuildOptions {
    /// Read access to the field behind `key`.
    pub fn slot(&self, key: OptionKey) -> Slot<'_> {
        use OptionKey as K;
        match key {
            K::BaseImageCacheDir => Slot::Str(&self.base_image_cache_dir),
            K::BinaryPath => Slot::Str(&self.binary_path),
            K::BuildContextPath => Slot::Str(&self.build_context_path),
            K::BuildSecrets => Slot::List(&self.build_secrets),
            K::CacheRepo => Slot::Str(&self.cache_repo),
            K::CacheTtlDays => Slot::Int(self.cache_ttl_days),
            K::CoderAgentSubsystem => Slot::List(&self.coder_agent_subsystem),
            K::CoderAgentToken => Slot::Str(&self.coder_agent_token),
            K::CoderAgentUrl => Slot::Str(&self.coder_agent_url),
            K::DevcontainerDir => Slot::Str(&self.devcontainer_dir),
            K::DevcontainerJsonPath => Slot::Str(&self.devcontainer_json_path),
            K::DockerConfigBase64 => Slot::Str(&self.docker_config_base64),
            K::DockerfilePath => Slot::Str(&self.dockerfile_path),
            K::ExitOnBuildFailure => Slot::Bool(self.exit_on_build_failure),
            K::ExportEnvFile => Slot::Str(&self.export_env_file),
            K::FallbackImage => Slot::Str(&self.fallback_image),
            K::ForceSafe => Slot::Bool(self.force_safe),
            K::GetCachedImage => Slot::Bool(self.get_cached_image),
            K::GitCloneDepth => Slot::Int(self.git_clone_depth),
            K::GitCloneSingleBranch => Slot::Bool(self.git_clone_single_branch),
            K::GitHttpProxyUrl => Slot::Str(&self.git_http_proxy_url),
            K::GitPassword => Slot::Str(&self.git_password),
            K::GitSshPrivateKeyBase64 => Slot::Str(&self.git_ssh_private_key_base64),
            K::GitSshPrivateKeyPath => Slot::Str(&self.git_ssh_private_key_path),
            K::GitUrl => Slot::Str(&self.git_url),
            K::GitUsername => Slot::Str(&self.git_username),
            K::IgnorePaths => Slot::List(&self.ignore_paths),
            K::InitArgs => Slot::Str(&self.init_args),
            K::InitCommand => Slot::Str(&self.init_command),
            K::InitScript => Slot::Str(&self.init_script),
            K::Insecure => Slot::Bool(self.insecure),
            K::LayerCacheDir => Slot::Str(&self.layer_cache_dir),
            K::PostStartScriptPath => Slot::Str(&self.post_start_script_path),
            K::PushImage => Slot::Bool(self.push_image),
            K::RemoteRepoBuildMode => Slot::Bool(self.remote_repo_build_mode),
            K::SetupScript => Slot::Str(&self.setup_script),
            K::SkipRebuild => Slot::Bool(self.skip_rebuild),
            K::SslCertBase64 => Slot::Str(&self.ssl_cert_base64),
            K::Verbose => Slot::Bool(self.verbose),
            K::WorkspaceFolder => Slot::Str(&self.workspace_folder),
        }
    }

    /// Write access to the field behind `key`.
    pub fn slot_mut(&mut self, key: OptionKey) -> SlotMut<'_> {
        use OptionKey as K;
        match key {
            K::BaseImageCacheDir => SlotMut::Str(&mut self.base_image_cache_dir),
            K::BinaryPath => SlotMut::Str(&mut self.binary_path),
            K::BuildContextPath => SlotMut::Str(&mut self.build_context_path),
            K::BuildSecrets => SlotMut::List(&mut self.build_secrets),
            K::CacheRepo => SlotMut::Str(&mut self.cache_repo),
            K::CacheTtlDays => SlotMut::Int(&mut self.cache_ttl_days),
            K::CoderAgentSubsystem => SlotMut::List(&mut self.coder_agent_subsystem),
            K::CoderAgentToken => SlotMut::Str(&mut self.coder_agent_token),
            K::CoderAgentUrl => SlotMut::Str(&mut self.coder_agent_url),
            K::DevcontainerDir => SlotMut::Str(&mut self.devcontainer_dir),
            K::DevcontainerJsonPath => SlotMut::Str(&mut self.devcontainer_json_path),
            K::DockerConfigBase64 => SlotMut::Str(&mut self.docker_config_base64),
            K::DockerfilePath => SlotMut::Str(&mut self.dockerfile_path),
            K::ExitOnBuildFailure => SlotMut::Bool(&mut self.exit_on_build_failure),
            K::ExportEnvFile => SlotMut::Str(&mut self.export_env_file),
            K::FallbackImage => SlotMut::Str(&mut self.fallback_image),
            K::ForceSafe => SlotMut::Bool(&mut self.force_safe),
            K::GetCachedImage => SlotMut::Bool(&mut self.get_cached_image),
            K::GitCloneDepth => SlotMut::Int(&mut self.git_clone_depth),
            K::GitCloneSingleBranch => SlotMut::Bool(&mut self.git_clone_single_branch),
            K::GitHttpProxyUrl => SlotMut::Str(&mut self.git_http_proxy_url),
            K::GitPassword => SlotMut::Str(&mut self.git_password),
            K::GitSshPrivateKeyBase64 => SlotMut::Str(&mut self.git_ssh_private_key_base64),
            K::GitSshPrivateKeyPath => SlotMut::Str(&mut self.git_ssh_private_key_path),
            K::GitUrl => SlotMut::Str(&mut self.git_url),
            K::GitUsername => SlotMut::Str(&mut self.git_username),
            K::IgnorePaths => SlotMut::List(&mut self.ignore_paths),
            K::InitArgs => SlotMut::Str(&mut self.init_args),
            K::InitCommand => SlotMut::Str(&mut self.init_command),
            K::InitScript => SlotMut::Str(&mut self.init_script),
            K::Insecure => SlotMut::Bool(&mut self.insecure),
            K::LayerCacheDir => SlotMut::Str(&mut self.layer_cache_dir),
            K::PostStartScriptPath => SlotMut::Str(&mut self.post_start_script_path),
            K::PushImage => SlotMut::Bool(&mut self.push_image),
            K::RemoteRepoBuildMode => SlotMut::Bool(&mut self.remote_repo_build_mode),
            K::SetupScript => SlotMut::Str(&mut self.setup_script),
            K::SkipRebuild => SlotMut::Bool(&mut self.skip_rebuild),
            K::SslCertBase64 => SlotMut::Str(&mut self.ssl_cert_base64),
            K::Verbose => SlotMut::Bool(&mut self.verbose),
            K::WorkspaceFolder => SlotMut::Str(&mut self.workspace_folder),
        }
    }
}

/// Borrowed view of one option's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<'a> {
    Bool(bool),
    Int(i64),
    Str(&'a str),
    List(&'a [String]),
}

impl Slot<'_> {
    pub fn kind(&self) -> OptionKind {
        match self {
            Self::Bool(_) => OptionKind::Bool,
            Self::Int(_) => OptionKind::Int,
            Self::Str(_) => OptionKind::String,
            Self::List(_) => OptionKind::StringList,
        }
    }

    /// Render as an environment value; list items are joined with commas.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Str(s) => (*s).to_owned(),
            Self::List(items) => items.join(","),
        }
    }

    /// Whether the value is the zero value of its kind.
    ///
    /// A list whose items join to an empty string counts as zero. The test
    /// is typed: a string or list whose text is "0" or "false" is not zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Bool(b) => !b,
            Self::Int(n) => *n == 0,
            Self::Str(s) => s.is_empty(),
            Self::List(items) => items.iter().all(String::is_empty) && items.len() <= 1,
        }
    }

    /// Copy the value out of the option set.
    pub fn to_value(&self) -> OptionValue {
        match self {
            Self::Bool(b) => OptionValue::Bool(*b),
            Self::Int(n) => OptionValue::Int(*n),
            Self::Str(s) => OptionValue::Str((*s).to_owned()),
            Self::List(items) => OptionValue::List(items.to_vec()),
        }
    }
}

/// An owned option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

/// Mutable view of one option's value.
#[derive(Debug)]
pub enum SlotMut<'a> {
    Bool(&'a mut bool),
    Int(&'a mut i64),
    Str(&'a mut String),
    List(&'a mut Vec<String>),
}

impl SlotMut<'_> {
    /// Parse `raw` and store it.
    ///
    /// List options **append** the comma-separated items of `raw`; an empty
    /// `raw` clears the list. Callers that want replace semantics must
    /// [`SlotMut::reset`] first.
    ///
    /// # Errors
    /// Returns an error if `raw` is not a valid boolean or integer for a
    /// boolean or integer option. The stored value is left untouched.
    pub fn set(self, raw: &str) -> Result<(), ParseError> {
        match self {
            Self::Bool(b) => *b = parse_bool(raw)?,
            Self::Int(n) => {
                *n = raw.parse().map_err(|source| ParseError::Int {
                    value: raw.to_owned(),
                    source,
                })?;
            }
            Self::Str(s) => raw.clone_into(s),
            Self::List(items) => {
                if raw.is_empty() {
                    items.clear();
                } else {
                    items.extend(raw.split(',').map(str::to_owned));
                }
            }
        }
        Ok(())
    }

    /// Return the option to its zero value.
    pub fn reset(self) {
        match self {
            Self::Bool(b) => *b = false,
            Self::Int(n) => *n = 0,
            Self::Str(s) => s.clear(),
            Self::List(items) => items.clear(),
        }
    }

    /// Store an owned value. A value of a different kind is ignored.
    pub fn assign(self, value: OptionValue) {
        match (self, value) {
            (Self::Bool(slot), OptionValue::Bool(v)) => *slot = v,
            (Self::Int(slot), OptionValue::Int(v)) => *slot = v,
            (Self::Str(slot), OptionValue::Str(v)) => *slot = v,
            (Self::List(slot), OptionValue::List(v)) => *slot = v,
            (slot, value) => {
                tracing::debug!(?slot, ?value, "ignoring value of mismatched kind");
            }
        }
    }
}

/// Accepts the same spellings as Go's `strconv.ParseBool`, which is what the
/// build engine itself accepts.
fn parse_bool(raw: &str) -> Result<bool, ParseError> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(ParseError::Bool {
            value: raw.to_owned(),
        }),
    }
}

/// An override value that does not parse as its option's kind.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("\"{value}\" is not a boolean")]
    Bool { value: String },
    #[error("\"{value}\" is not an integer: {source}")]
    Int {
        value: String,
        source: ParseIntError,
    },
}
