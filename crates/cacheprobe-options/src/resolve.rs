//! Explicit configuration fields to option set.

use std::collections::BTreeSet;

use cacheprobe_config::Configuration;

use crate::option::{BuildOptions, OptionKey, OptionValue};

/// Options that may only be set from the configuration's required fields.
pub const IMMUTABLE: [OptionKey; 2] = [OptionKey::CacheRepo, OptionKey::GitUrl];

/// Which options were set explicitly through the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    explicit: BTreeSet<OptionKey>,
}

impl Provenance {
    pub fn mark_explicit(&mut self, key: OptionKey) {
        self.explicit.insert(key);
    }

    pub fn is_explicit(&self, key: OptionKey) -> bool {
        self.explicit.contains(&key)
    }

    pub fn explicit(&self) -> impl Iterator<Item = OptionKey> + '_ {
        self.explicit.iter().copied()
    }
}

/// Build the option set from the configuration's typed fields.
///
/// Every provided optional field is marked explicit. `remote_repo_build_mode`
/// falls back to `true` without being marked.
pub fn resolve_explicit(config: &Configuration) -> (BuildOptions, Provenance) {
    let mut options = BuildOptions {
        cache_repo: config.cache_repo.clone(),
        git_url: config.git_url.clone(),
        remote_repo_build_mode: true,
        ..BuildOptions::default()
    };
    let mut provenance = Provenance::default();

    for (key, value) in provided_fields(config) {
        let Some(value) = value else { continue };
        options.slot_mut(key).assign(value);
        provenance.mark_explicit(key);
    }

    (options, provenance)
}

fn provided_fields(config: &Configuration) -> Vec<(OptionKey, Option<OptionValue>)> {
    use OptionKey as K;
    use OptionValue as V;

    let text = |v: &Option<String>| v.clone().map(V::Str);
    let flag = |v: &Option<bool>| v.map(V::Bool);
    let int = |v: &Option<i64>| v.map(V::Int);

    let secrets = config.build_secrets.as_ref().map(|secrets| {
        V::List(secrets.iter().map(|(k, v)| format!("{k}={v}")).collect())
    });

    vec![
        (K::BaseImageCacheDir, text(&config.base_image_cache_dir)),
        (K::BuildContextPath, text(&config.build_context_path)),
        (K::BuildSecrets, secrets),
        (K::CacheTtlDays, int(&config.cache_ttl_days)),
        (K::DevcontainerDir, text(&config.devcontainer_dir)),
        (K::DevcontainerJsonPath, text(&config.devcontainer_json_path)),
        (K::DockerfilePath, text(&config.dockerfile_path)),
        (K::DockerConfigBase64, text(&config.docker_config_base64)),
        (K::ExitOnBuildFailure, flag(&config.exit_on_build_failure)),
        (K::FallbackImage, text(&config.fallback_image)),
        (K::GitCloneDepth, int(&config.git_clone_depth)),
        (K::GitCloneSingleBranch, flag(&config.git_clone_single_branch)),
        (K::GitHttpProxyUrl, text(&config.git_http_proxy_url)),
        (K::GitPassword, text(&config.git_password)),
        (K::GitSshPrivateKeyPath, text(&config.git_ssh_private_key_path)),
        (K::GitSshPrivateKeyBase64, text(&config.git_ssh_private_key_base64)),
        (K::GitUsername, text(&config.git_username)),
        (K::IgnorePaths, config.ignore_paths.clone().map(V::List)),
        (K::Insecure, flag(&config.insecure)),
        (K::RemoteRepoBuildMode, flag(&config.remote_repo_build_mode)),
        (K::SslCertBase64, text(&config.ssl_cert_base64)),
        (K::Verbose, flag(&config.verbose)),
        (K::WorkspaceFolder, text(&config.workspace_folder)),
    ]
}
