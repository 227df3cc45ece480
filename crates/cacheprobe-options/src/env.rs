//! Projection of a final option set into `KEY=VALUE` environment entries.

use std::collections::BTreeMap;

use crate::option::{BuildOptions, OptionKey};

/// Options that are set for the probe only and never derived into the
/// environment.
pub const PROBE_ONLY: [OptionKey; 4] = [
    OptionKey::BinaryPath,
    OptionKey::ForceSafe,
    OptionKey::GetCachedImage,
    OptionKey::PushImage,
];

/// Whether an override entry is copied verbatim into the environment.
///
/// Everything except a recognized namespaced option passes through, which
/// makes legacy option names reachable only as explicit entries.
pub fn is_pass_through(name: &str) -> bool {
    OptionKey::from_env_name(name).map_or(true, OptionKey::is_legacy)
}

/// The computed environment, sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputedEnv {
    vars: BTreeMap<String, String>,
}

impl ComputedEnv {
    /// Derive the environment from `options` plus the pass-through entries
    /// of `overrides`. Pass-through entries are applied last and win.
    pub fn compute(options: &BuildOptions, overrides: &BTreeMap<String, String>) -> Self {
        let mut vars = BTreeMap::new();

        for key in OptionKey::ALL {
            if key.is_legacy() || PROBE_ONLY.contains(&key) {
                continue;
            }
            let slot = options.slot(key);
            if slot.is_zero() {
                continue;
            }
            vars.insert(key.env_name().to_owned(), slot.render());
        }

        for (name, value) in overrides {
            if is_pass_through(name) {
                vars.insert(name.clone(), value.clone());
            }
        }

        Self { vars }
    }

    /// Ordered `KEY=VALUE` entries.
    pub fn entries(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    pub fn map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.vars
    }
}
