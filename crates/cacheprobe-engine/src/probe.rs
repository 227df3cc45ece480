//! The external probe contract and a process-backed implementation.

use std::path::Path;
use std::process::Command;

use cacheprobe_image::{Digest, ImageError};
use cacheprobe_options::{BuildOptions, OptionKey};
use cacheprobe_util::process::run_command_cancellable;
use cacheprobe_util::{Cancellation, UtilError};

use crate::workspace::KANIKO_DIR;

/// The stdout marker a successful probe prints, followed by `<ref>@<digest>`.
pub const CACHED_IMAGE_MARKER: &str = "ENVBUILDER_CACHED_IMAGE=";

/// Environment inherited by the probe process; everything else is cleared.
const INHERITED_ENV: [&str; 2] = ["PATH", "HOME"];

/// Options that only matter when a container actually starts.
const IRRELEVANT_TO_PROBE: [OptionKey; 11] = [
    OptionKey::CoderAgentSubsystem,
    OptionKey::CoderAgentToken,
    OptionKey::CoderAgentUrl,
    OptionKey::ExportEnvFile,
    OptionKey::InitArgs,
    OptionKey::InitCommand,
    OptionKey::InitScript,
    OptionKey::LayerCacheDir,
    OptionKey::PostStartScriptPath,
    OptionKey::SetupScript,
    OptionKey::SkipRebuild,
];

/// Why a probe did not produce a cached image.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The builder binary could not be obtained.
    #[error("cannot extract builder binary: {0}")]
    Binary(#[from] ImageError),

    /// The probe process could not be run or was cancelled.
    #[error("{0}")]
    Exec(#[from] UtilError),

    /// The probe ran and found nothing usable in the cache.
    #[error("{message}")]
    Miss { message: String },

    /// The probe reported an image whose digest cannot be read.
    #[error("invalid digest in '{reference}'")]
    Digest { reference: String },
}

impl ProbeError {
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Binary(e) => e.is_cancellation(),
            Self::Exec(e) => e.is_cancellation(),
            _ => false,
        }
    }
}

/// The image a successful probe found in the cache repository.
pub trait ArtifactImage {
    /// Content digest of the image manifest.
    ///
    /// # Errors
    /// Returns an error if the digest cannot be determined.
    fn digest(&self) -> Result<Digest, ProbeError>;
}

/// Inputs for one probe run.
#[derive(Debug)]
pub struct ProbeRequest<'a> {
    /// Options with the probe-only values already forced.
    pub options: &'a BuildOptions,
    /// The extracted builder binary.
    pub binary: &'a Path,
    /// Scratch directory; the probe's working directory.
    pub workspace: &'a Path,
}

/// A dry-run build that reports whether the would-be image is cached.
pub trait Probe {
    /// Run the probe.
    ///
    /// # Errors
    /// Any error means the image was not found, except a cancellation,
    /// which the caller treats as fatal.
    fn probe(
        &self,
        request: &ProbeRequest<'_>,
        cancel: &Cancellation,
    ) -> Result<Box<dyn ArtifactImage>, ProbeError>;
}

/// Copy `resolved` and force the values a probe run needs.
pub fn probe_options(resolved: &BuildOptions, binary: &Path, workspace: &Path) -> BuildOptions {
    let mut options = resolved.clone();
    options.get_cached_image = true;
    options.force_safe = false;
    options.push_image = false;
    options.binary_path = binary.display().to_string();
    if options.workspace_folder.is_empty() {
        options.workspace_folder = workspace.join("workspace").display().to_string();
    }
    for key in IRRELEVANT_TO_PROBE {
        options.slot_mut(key).reset();
    }
    options
}

/// Every non-zero option as `(name, value)`, probe-only options included.
pub fn option_env(options: &BuildOptions) -> Vec<(&'static str, String)> {
    OptionKey::ALL
        .iter()
        .filter_map(|&key| {
            let slot = options.slot(key);
            (!slot.is_zero()).then(|| (key.env_name(), slot.render()))
        })
        .collect()
}

/// Runs the extracted builder binary as the probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandProbe;

impl CommandProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Probe for CommandProbe {
    fn probe(
        &self,
        request: &ProbeRequest<'_>,
        cancel: &Cancellation,
    ) -> Result<Box<dyn ArtifactImage>, ProbeError> {
        let mut cmd = Command::new(request.binary);
        cmd.env_clear();
        for name in INHERITED_ENV {
            if let Some(value) = std::env::var_os(name) {
                cmd.env(name, value);
            }
        }
        for (name, value) in option_env(request.options) {
            cmd.env(name, value);
        }
        cmd.env("KANIKO_DIR", request.workspace.join(KANIKO_DIR));
        cmd.current_dir(request.workspace);

        tracing::info!(binary = %request.binary.display(), "running probe");
        let output = run_command_cancellable(&mut cmd, cancel)?;
        if !output.success {
            let message = match output.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                Some(line) => format!("probe failed: {}", line.trim()),
                None => match output.exit_code {
                    Some(code) => format!("probe exited with code {code}"),
                    None => "probe was terminated by a signal".to_owned(),
                },
            };
            return Err(ProbeError::Miss { message });
        }

        let reference = parse_cached_image(&output.stdout).ok_or_else(|| ProbeError::Miss {
            message: "probe reported no cached image".to_owned(),
        })?;
        tracing::debug!(reference = %reference, "probe reported cached image");
        Ok(Box::new(ReportedImage { reference }))
    }
}

/// The last `ENVBUILDER_CACHED_IMAGE=` value printed on stdout.
pub fn parse_cached_image(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(CACHED_IMAGE_MARKER))
        .map(str::trim)
        .filter(|reference| !reference.is_empty())
        .map(str::to_owned)
}

/// An image reference reported by the probe process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedImage {
    pub reference: String,
}

impl ArtifactImage for ReportedImage {
    fn digest(&self) -> Result<Digest, ProbeError> {
        let invalid = || ProbeError::Digest {
            reference: self.reference.clone(),
        };
        let (_, digest) = self.reference.rsplit_once('@').ok_or_else(invalid)?;
        Digest::parse(digest).map_err(|_| invalid())
    }
}
