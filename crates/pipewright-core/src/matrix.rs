//! Matrix expansion.
//!
//! Turns a [`JobTemplate`] into concrete, immutable [`JobInstance`]s, one per
//! matrix variant in declared order (or a single implicit instance when the
//! matrix is empty).

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::document::{EnvMap, JobTemplate, StepSpec};
use crate::error::{EngineError, Result};

/// Platform after variable substitution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedPlatform {
    pub pool_image: String,
    pub container_image: Option<String>,
}

/// A concrete schedulable job, produced by expansion and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobInstance {
    /// Unique id for this instance within the run.
    pub id: Uuid,

    /// Name of the template this instance came from.
    pub template_name: String,

    /// Matrix variant name, `None` for the implicit single instance.
    pub variant: Option<String>,

    /// Reporting label: `name` or `name [variant]`.
    pub display_name: String,

    /// Platform with `$(var)` references resolved.
    pub resolved_platform: ResolvedPlatform,

    /// Run, template, and matrix variables merged in precedence order.
    /// Step-level overrides are applied later, per step.
    pub resolved_env: EnvMap,

    /// Whole-job wall clock bound, copied from the template.
    pub timeout_secs: u64,

    /// Steps to run strictly in order.
    pub steps: Vec<StepSpec>,
}

/// Expand a template into its job instances.
///
/// Precedence, lowest first: run-level variables, template variables, matrix
/// bindings. An empty matrix yields exactly one instance, so
/// `expand(t, v).len() == max(1, t.matrix.len())`.
pub fn expand(template: &JobTemplate, run_vars: &EnvMap) -> Result<Vec<JobInstance>> {
    let mut base = run_vars.clone();
    base.extend(template.variables.clone());

    if template.matrix.is_empty() {
        let instance = instantiate(template, None, base)?;
        return Ok(vec![instance]);
    }

    let instances = template
        .matrix
        .iter()
        .map(|variant| {
            let mut env = base.clone();
            env.extend(variant.bindings.clone());
            instantiate(template, Some(variant.name.as_str()), env)
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        template = %template.name,
        instances = instances.len(),
        "expanded matrix"
    );
    Ok(instances)
}

fn instantiate(
    template: &JobTemplate,
    variant: Option<&str>,
    resolved_env: EnvMap,
) -> Result<JobInstance> {
    let container_image = match &template.platform.container_image {
        Some(raw) => Some(substitute(raw, &resolved_env, &template.name, variant)?),
        None => None,
    };

    let display_name = match variant {
        Some(v) => format!("{} [{}]", template.name, v),
        None => template.name.clone(),
    };

    Ok(JobInstance {
        id: Uuid::new_v4(),
        template_name: template.name.clone(),
        variant: variant.map(|v| v.to_string()),
        display_name,
        resolved_platform: ResolvedPlatform {
            pool_image: template.platform.pool_image.clone(),
            container_image,
        },
        resolved_env,
        timeout_secs: template.timeout_secs,
        steps: template.steps.clone(),
    })
}

/// Resolve `$(name)` references against the instance environment.
///
/// Undefined or unterminated references are configuration errors; expansion
/// fails before anything is dispatched.
fn substitute(input: &str, env: &EnvMap, job: &str, variant: Option<&str>) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find(')').ok_or_else(|| {
            EngineError::Configuration(format!(
                "unterminated variable reference in container image '{input}' for job '{job}'"
            ))
        })?;
        let name = &after[..end];
        let value = env.get(name).ok_or_else(|| {
            let scope = match variant {
                Some(v) => format!("{job} [{v}]"),
                None => job.to_string(),
            };
            EngineError::Configuration(format!(
                "undefined variable '{name}' referenced by container image for {scope}"
            ))
        })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
