//! Option resolution for cacheprobe.
//!
//! A [`Configuration`] is turned into a [`BuildOptions`] set in three steps:
//! explicit fields are resolved, the `extra_env` override map is applied on
//! top, and exclusive option groups are checked. The result also yields the
//! [`ComputedEnv`] reported back to the caller.

#![forbid(unsafe_code)]

pub mod diagnostics;
pub mod env;
pub mod option;
pub mod overrides;
pub mod resolve;

use cacheprobe_config::Configuration;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use env::ComputedEnv;
pub use option::{BuildOptions, OptionKey, OptionKind, OptionValue, ParseError, Slot, SlotMut};
pub use resolve::{Provenance, IMMUTABLE};

/// The outcome of resolving one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub options: BuildOptions,
    pub provenance: Provenance,
    pub diagnostics: Diagnostics,
}

impl Resolution {
    /// The environment for these options and the configuration's pass-through
    /// entries.
    pub fn environment(&self, config: &Configuration) -> ComputedEnv {
        ComputedEnv::compute(&self.options, &config.extra_env)
    }
}

/// Resolve explicit fields, apply overrides, then check exclusive groups.
pub fn resolve(config: &Configuration) -> Resolution {
    let (mut options, provenance) = resolve::resolve_explicit(config);
    let mut diagnostics = overrides::apply_overrides(&mut options, &provenance, &config.extra_env);
    diagnostics.extend(overrides::check_exclusive(&options));
    Resolution {
        options,
        provenance,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn verbose_override_and_pass_through_example() {
        let config = Configuration {
            extra_env: BTreeMap::from([
                ("ENVBUILDER_VERBOSE".to_owned(), "true".to_owned()),
                ("FOO".to_owned(), "bar\nbaz".to_owned()),
            ]),
            ..Configuration::new("envbuilder:latest", "reg/cache", "git@x/y")
        };

        let resolution = resolve(&config);
        assert!(resolution.diagnostics.is_empty());
        assert_eq!(
            resolution.environment(&config).entries(),
            vec![
                "ENVBUILDER_CACHE_REPO=reg/cache",
                "ENVBUILDER_GIT_URL=git@x/y",
                "ENVBUILDER_REMOTE_REPO_BUILD_MODE=true",
                "ENVBUILDER_VERBOSE=true",
                "FOO=bar\nbaz",
            ]
        );
    }

    #[test]
    fn cache_repo_override_example() {
        let config = Configuration {
            extra_env: BTreeMap::from([("ENVBUILDER_CACHE_REPO".to_owned(), "x".to_owned())]),
            ..Configuration::new("envbuilder:latest", "reg/cache", "git@x/y")
        };

        let resolution = resolve(&config);
        assert_eq!(resolution.diagnostics.len(), 1);
        assert_eq!(resolution.diagnostics.warning_count(), 1);
        assert_eq!(resolution.options.cache_repo, "reg/cache");
        assert_eq!(
            resolution.environment(&config).map().get("ENVBUILDER_CACHE_REPO"),
            Some(&"reg/cache".to_owned())
        );
    }

    #[test]
    fn exclusive_keys_set_through_fields_are_reported() {
        let config = Configuration {
            git_ssh_private_key_path: Some("/key".to_owned()),
            git_ssh_private_key_base64: Some("a2V5".to_owned()),
            ..Configuration::new("b", "c", "g")
        };
        let resolution = resolve(&config);
        assert_eq!(resolution.diagnostics.error_count(), 1);
        assert_eq!(
            resolution.diagnostics.iter().next().and_then(|d| d.key.clone()),
            Some("ENVBUILDER_GIT_SSH_PRIVATE_KEY_PATH".to_owned())
        );
    }

    #[test]
    fn explicit_overrides_of_every_field_warn_once_each() {
        let config = Configuration {
            git_username: Some("u".to_owned()),
            git_password: Some("p".to_owned()),
            remote_repo_build_mode: Some(false),
            extra_env: BTreeMap::from([
                ("ENVBUILDER_GIT_USERNAME".to_owned(), "u2".to_owned()),
                ("ENVBUILDER_GIT_PASSWORD".to_owned(), "p2".to_owned()),
                ("ENVBUILDER_REMOTE_REPO_BUILD_MODE".to_owned(), "true".to_owned()),
                ("ENVBUILDER_GIT_URL".to_owned(), "elsewhere".to_owned()),
            ]),
            ..Configuration::new("b", "c", "g")
        };
        let resolution = resolve(&config);
        assert_eq!(resolution.diagnostics.warning_count(), 4);
        assert_eq!(resolution.diagnostics.error_count(), 0);
        assert!(resolution.options.remote_repo_build_mode);
        assert_eq!(resolution.options.git_url, "g");
    }

    fn config_strategy() -> impl Strategy<Value = Configuration> {
        let key = prop_oneof![
            Just("ENVBUILDER_VERBOSE".to_owned()),
            Just("ENVBUILDER_IGNORE_PATHS".to_owned()),
            Just("ENVBUILDER_CACHE_TTL_DAYS".to_owned()),
            Just("ENVBUILDER_GIT_URL".to_owned()),
            Just("CODER_AGENT_TOKEN".to_owned()),
            "[A-Z_]{1,10}",
        ];
        (
            proptest::collection::btree_map(key, "\\PC{0,12}", 0..8),
            proptest::option::of(proptest::collection::vec("[a-z/]{1,6}", 0..3)),
            proptest::option::of(any::<bool>()),
        )
            .prop_map(|(extra_env, ignore_paths, verbose)| Configuration {
                ignore_paths,
                verbose,
                extra_env,
                ..Configuration::new("envbuilder:latest", "reg/cache", "git@x/y")
            })
    }

    proptest! {
        #[test]
        fn environment_is_deterministic(config in config_strategy()) {
            let first = resolve(&config);
            let second = resolve(&config);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(
                first.environment(&config).entries(),
                second.environment(&config).entries()
            );
        }

        #[test]
        fn environment_is_sorted(config in config_strategy()) {
            let env = resolve(&config).environment(&config);
            let keys: Vec<&String> = env.map().keys().collect();
            let entries = env.entries();
            prop_assert_eq!(keys.len(), entries.len());
            for (key, entry) in keys.iter().zip(&entries) {
                let prefix = format!("{key}=");
                prop_assert!(entry.starts_with(&prefix), "{} does not start with {}", entry, prefix);
            }
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }
    }
}
