//! Reconciliation: probe for a cached image, then keep the recorded state honest.

use std::path::PathBuf;

use cacheprobe_config::{Configuration, ResourceState, NIL_ID};
use cacheprobe_image::{locate_binary, Digest, ImageSource, BUILDER_BINARY_PATH};
use cacheprobe_options::{ComputedEnv, Diagnostics, Resolution};
use cacheprobe_util::Cancellation;

use crate::error::EngineError;
use crate::probe::{probe_options, ArtifactImage, Probe, ProbeError, ProbeRequest};
use crate::workspace::ScopedWorkspace;

/// How a Create pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The cache repository holds an image for this configuration.
    Found,
    /// No usable cached image; the builder image stands in.
    NotFound,
}

/// Result of a Create pass.
#[derive(Debug)]
pub struct CreateResult {
    pub outcome: CreateOutcome,
    pub state: ResourceState,
    /// Warnings from option resolution and the probe.
    pub diagnostics: Diagnostics,
}

/// How a Read pass judged the prior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The cached image is still in the registry.
    StillFound,
    /// The state must be discarded and recreated.
    Invalidated,
    /// The registry could not be asked; the prior image is kept.
    Transient,
}

/// Result of a Read pass.
#[derive(Debug)]
pub struct ReadResult {
    pub outcome: ReadOutcome,
    /// The refreshed state, or `None` when invalidated.
    pub state: Option<ResourceState>,
    pub diagnostics: Diagnostics,
}

/// Drives one resource through Create, Read, Update and Delete.
///
/// Each pass is sequential and owns its scratch space; nothing is shared
/// between passes.
pub struct Reconciler<'a> {
    source: &'a dyn ImageSource,
    probe: &'a dyn Probe,
    scratch_root: Option<PathBuf>,
}

impl<'a> Reconciler<'a> {
    pub fn new(source: &'a dyn ImageSource, probe: &'a dyn Probe) -> Self {
        Self {
            source,
            probe,
            scratch_root: None,
        }
    }

    /// Create scoped workspaces under `root` instead of the system temp dir.
    #[must_use]
    pub fn with_scratch_root(mut self, root: PathBuf) -> Self {
        self.scratch_root = Some(root);
        self
    }

    /// Probe for a cached image.
    ///
    /// Steps:
    /// 1. Resolve options; error diagnostics abort the pass
    /// 2. Create a scoped workspace
    /// 3. Extract the builder binary from the builder image
    /// 4. Run the probe with the probe-only options forced
    /// 5. Record `cache_repo@digest` on a hit, the builder image on a miss
    ///
    /// A miss at step 3 or 4 is a warning, not an error.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the workspace cannot
    /// be created, the pass is cancelled, or a reported image has an
    /// unreadable digest.
    pub fn create(
        &self,
        config: &Configuration,
        cancel: &Cancellation,
    ) -> Result<CreateResult, EngineError> {
        // 1. Resolve.
        let resolution = resolve_checked(config)?;
        let env = resolution.environment(config);
        let mut diagnostics = resolution.diagnostics.clone();

        // 2-4. Probe inside a workspace that is removed on every exit path.
        let probed = {
            let workspace = ScopedWorkspace::create(self.scratch_root.as_deref())?;
            self.run_probe(config, &resolution, &workspace, cancel)
        };

        // 5. Record.
        let state = match probed {
            Ok(artifact) => {
                let digest = artifact
                    .digest()
                    .map_err(|source| EngineError::Digest { source })?;
                tracing::info!(digest = %digest, "found image");
                found_state(&config.cache_repo, &digest, env)
            }
            Err(err) if err.is_cancellation() => return Err(EngineError::Probe(err)),
            Err(err) => {
                tracing::info!(error = %err, "no cached image");
                diagnostics.warning(
                    "Cached image not found",
                    format!(
                        "Unable to check for cached image: {err}. \
                         The image will be rebuilt on the next pass."
                    ),
                    None,
                );
                not_found_state(config, env)
            }
        };

        let outcome = if state.exists {
            CreateOutcome::Found
        } else {
            CreateOutcome::NotFound
        };
        Ok(CreateResult {
            outcome,
            state,
            diagnostics,
        })
    }

    fn run_probe(
        &self,
        config: &Configuration,
        resolution: &Resolution,
        workspace: &ScopedWorkspace,
        cancel: &Cancellation,
    ) -> Result<Box<dyn ArtifactImage>, ProbeError> {
        let located = locate_binary(
            self.source,
            &config.builder_image,
            BUILDER_BINARY_PATH,
            &workspace.binary_path(),
            cancel,
        )?;
        let options = probe_options(&resolution.options, &located.path, workspace.path());
        let request = ProbeRequest {
            options: &options,
            binary: &located.path,
            workspace: workspace.path(),
        };
        self.probe.probe(&request, cancel)
    }

    /// Check that a previously recorded image still exists.
    ///
    /// The environment is always recomputed from `config`. A prior miss, or
    /// a prior hit in a different cache repository, is invalidated without
    /// contacting the registry.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the pass is
    /// cancelled. Registry failures are never errors.
    pub fn read(
        &self,
        config: &Configuration,
        prior: &ResourceState,
        cancel: &Cancellation,
    ) -> Result<ReadResult, EngineError> {
        let resolution = resolve_checked(config)?;
        let env = resolution.environment(config);
        let mut diagnostics = resolution.diagnostics;

        let same_repo = prior
            .image
            .rsplit_once('@')
            .is_some_and(|(repo, _)| repo == config.cache_repo);
        if !prior.exists || prior.image == config.builder_image || !same_repo {
            tracing::info!(image = %prior.image, "prior state is not a cache hit, invalidating");
            return Ok(ReadResult {
                outcome: ReadOutcome::Invalidated,
                state: None,
                diagnostics,
            });
        }

        match self.source.fetch_digest(&prior.image, cancel) {
            Ok(digest) => {
                tracing::debug!(digest = %digest, "cached image still present");
                Ok(ReadResult {
                    outcome: ReadOutcome::StillFound,
                    state: Some(found_state(&config.cache_repo, &digest, env)),
                    diagnostics,
                })
            }
            Err(err) if err.is_cancellation() => Err(err.into()),
            Err(err) if err.is_not_found() => {
                tracing::info!(image = %prior.image, "cached image is gone, invalidating");
                diagnostics.warning(
                    "Cached image not found",
                    format!("{err}. The image will be rebuilt on the next pass."),
                    None,
                );
                Ok(ReadResult {
                    outcome: ReadOutcome::Invalidated,
                    state: None,
                    diagnostics,
                })
            }
            Err(err) => {
                tracing::warn!(image = %prior.image, error = %err, "cannot verify cached image");
                diagnostics.warning(
                    "Unable to verify cached image",
                    format!("{err}. Keeping the recorded image."),
                    None,
                );
                let state = ResourceState {
                    env: env.entries(),
                    env_map: env.into_map(),
                    ..prior.clone()
                };
                Ok(ReadResult {
                    outcome: ReadOutcome::Transient,
                    state: Some(state),
                    diagnostics,
                })
            }
        }
    }

    /// Persist the most recently computed state unchanged.
    pub fn update(&self, state: &ResourceState) -> ResourceState {
        tracing::debug!(image = %state.image, "update is a no-op");
        state.clone()
    }

    /// Forget the state. The remote image is left alone.
    pub fn delete(&self, state: &ResourceState) {
        tracing::debug!(image = %state.image, "delete leaves the registry untouched");
    }
}

/// Resolve options, turning error diagnostics into a fatal error.
fn resolve_checked(config: &Configuration) -> Result<Resolution, EngineError> {
    config.validate()?;
    let resolution = cacheprobe_options::resolve(config);
    if resolution.diagnostics.has_errors() {
        return Err(EngineError::InvalidOptions {
            error_count: resolution.diagnostics.error_count(),
            diagnostics: resolution.diagnostics,
        });
    }
    Ok(resolution)
}

fn found_state(cache_repo: &str, digest: &Digest, env: ComputedEnv) -> ResourceState {
    ResourceState {
        id: digest.to_string(),
        exists: true,
        image: format!("{cache_repo}@{digest}"),
        env: env.entries(),
        env_map: env.into_map(),
    }
}

fn not_found_state(config: &Configuration, env: ComputedEnv) -> ResourceState {
    ResourceState {
        id: NIL_ID.to_owned(),
        exists: false,
        image: config.builder_image.clone(),
        env: env.entries(),
        env_map: env.into_map(),
    }
}
