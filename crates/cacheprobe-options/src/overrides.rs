//! Applying the string-keyed override map onto a resolved option set.

use std::collections::BTreeMap;

use crate::diagnostics::Diagnostics;
use crate::option::{BuildOptions, OptionKey, OptionKind};
use crate::resolve::{Provenance, IMMUTABLE};

/// Groups of options of which at most one may carry a value.
pub const EXCLUSIVE_GROUPS: [[OptionKey; 2]; 1] = [[
    OptionKey::GitSshPrivateKeyPath,
    OptionKey::GitSshPrivateKeyBase64,
]];

/// Apply every override that names a known option.
///
/// Problems are collected rather than returned early, so one pass reports
/// every bad key. A value that fails to parse leaves the option unchanged
/// and reports only the parse error; the provider-set warning is emitted for
/// overrides that were actually applied.
pub fn apply_overrides(
    options: &mut BuildOptions,
    provenance: &Provenance,
    overrides: &BTreeMap<String, String>,
) -> Diagnostics {
    let mut diags = Diagnostics::new();

    for (name, raw) in overrides {
        let Some(key) = OptionKey::from_env_name(name) else {
            continue;
        };

        if IMMUTABLE.contains(&key) {
            diags.warning(
                "Cannot override required option",
                format!(
                    "The key {name:?} in extra_env cannot be overridden; set it through its \
                     configuration field instead."
                ),
                Some(name),
            );
            continue;
        }

        let prior = options.slot(key).to_value();
        // List setters append, so start from empty to get replace semantics.
        if key.kind() == OptionKind::StringList {
            options.slot_mut(key).reset();
        }

        if let Err(e) = options.slot_mut(key).set(raw) {
            options.slot_mut(key).assign(prior);
            diags.error(
                "Invalid value for override",
                format!("The key {name:?} in extra_env has an invalid value: {e}"),
                Some(name),
            );
            continue;
        }

        tracing::info!(key = name.as_str(), "applied override");
        if provenance.is_explicit(key) {
            diags.warning(
                "Overriding provider-set option",
                format!(
                    "The key {name:?} in extra_env overrides a value set by its \
                     configuration field."
                ),
                Some(name),
            );
        }
    }

    diags
}

/// Report every exclusive group with more than one option set.
pub fn check_exclusive(options: &BuildOptions) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for group in EXCLUSIVE_GROUPS {
        let set: Vec<&str> = group
            .iter()
            .filter(|key| !options.slot(**key).is_zero())
            .map(|key| key.env_name())
            .collect();
        if set.len() > 1 {
            diags.error(
                "Conflicting options",
                format!("Only one of {} may be set.", set.join(", ")),
                set.first().copied(),
            );
        }
    }
    diags
}
