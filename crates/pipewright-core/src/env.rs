//! Per-step environment construction.

use crate::document::{EnvMap, StepSpec};

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

/// Build the environment snapshot for one step.
///
/// Returns a fresh copy; `job_env` is never mutated, so sibling steps cannot
/// observe each other's overrides. An override replaces the job value
/// wholesale unless the key uses the additive `NAME+` form, which appends
/// the override to the existing value with the platform path separator
/// (intended for PATH-like variables).
pub fn build_step_env(job_env: &EnvMap, step: &StepSpec) -> EnvMap {
    let mut env = job_env.clone();

    for (key, value) in &step.env_overrides {
        match key.strip_suffix('+') {
            Some(name) => {
                let merged = match env.get(name) {
                    Some(existing) if !existing.is_empty() => {
                        format!("{existing}{PATH_SEPARATOR}{value}")
                    }
                    _ => value.clone(),
                };
                env.insert(name.to_string(), merged);
            }
            None => {
                env.insert(key.clone(), value.clone());
            }
        }
    }

    env
}
