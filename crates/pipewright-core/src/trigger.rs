//! Trigger evaluation.
//!
//! Decides whether a change should start a run at all. Pure and
//! deterministic: same change, same rule, same answer.

use glob_match::glob_match;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{ChangeContext, TriggerRule};

/// How directory patterns like `docs/*` treat nested paths.
///
/// `Shallow` follows conventional glob semantics: `docs/*` covers immediate
/// children only, so `docs/guide/intro.md` escapes the pattern. `Recursive`
/// widens a trailing `/*` to `/**`, covering the whole subtree. The default
/// is `Shallow`; hosts that expect vendor-style recursive exclusion can opt
/// in per run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GlobPolicy {
    #[default]
    Shallow,
    Recursive,
}

/// Evaluate a trigger rule against a change.
///
/// Returns `true` when the run should proceed:
/// - the branch must match an entry in `included_branches` (entries are
///   globs, so `release/*` covers every release branch);
/// - an empty `changed_paths` list means the diff is unknown and the run
///   proceeds;
/// - otherwise at least one changed path must escape every exclusion
///   pattern. A change touching only excluded paths is skipped.
pub fn evaluate(change: &ChangeContext, rule: &TriggerRule, policy: GlobPolicy) -> bool {
    let branch_included = rule
        .included_branches
        .iter()
        .any(|pattern| glob_match(pattern, &change.branch));
    if !branch_included {
        debug!(branch = %change.branch, "branch not included, skipping");
        return false;
    }

    if change.changed_paths.is_empty() {
        return true;
    }

    let meaningful = change.changed_paths.iter().any(|path| {
        !rule
            .excluded_paths
            .iter()
            .any(|pattern| pattern_matches(pattern, path, policy))
    });
    if !meaningful {
        debug!(branch = %change.branch, "all changed paths excluded, skipping");
    }
    meaningful
}

fn pattern_matches(pattern: &str, path: &str, policy: GlobPolicy) -> bool {
    match policy {
        GlobPolicy::Shallow => glob_match(pattern, path),
        GlobPolicy::Recursive => {
            if let Some(prefix) = pattern.strip_suffix("/*") {
                glob_match(&format!("{prefix}/**"), path)
            } else {
                glob_match(pattern, path)
            }
        }
    }
}
