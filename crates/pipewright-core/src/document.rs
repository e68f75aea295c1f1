//! Pipeline document model.
//!
//! The document is the engine's only external input: a declarative record of
//! triggers, job templates, matrices, and steps. Documents are plain serde
//! value types and are never mutated after loading.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, Result};

/// Ordered variable map. BTreeMap keeps digest computation deterministic.
pub type EnvMap = BTreeMap<String, String>;

/// Branch inclusion and path exclusion rule for a pipeline.
///
/// A change matches when its branch is covered by `included_branches` and at
/// least one changed path escapes every pattern in `excluded_paths`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerRule {
    /// Branch names (or globs, e.g. `release/*`) the pipeline reacts to.
    pub included_branches: Vec<String>,

    /// Path globs that do not count as meaningful changes.
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

/// Where a job's steps run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformSpec {
    /// Build agent pool image (e.g. `ubuntu-22.04`).
    pub pool_image: String,

    /// Optional container image. May reference matrix variables with
    /// `$(name)`, resolved during expansion.
    #[serde(default)]
    pub container_image: Option<String>,
}

/// A single shell step inside a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSpec {
    /// Reporting-only label. Never used for control flow.
    pub display_name: String,

    /// Opaque script body handed to the executor verbatim.
    pub script: String,

    /// Step-scoped variable overrides. A key ending in `+` appends to the
    /// job value with the platform path separator instead of replacing it.
    #[serde(default)]
    pub env_overrides: EnvMap,
}

impl StepSpec {
    /// Create a step with no overrides.
    pub fn new(display_name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            script: script.into(),
            env_overrides: EnvMap::new(),
        }
    }

    /// Add a variable override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }
}

/// One named matrix entry: a variant name and its variable bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixVariant {
    pub name: String,
    pub bindings: EnvMap,
}

/// Ordered collection of matrix variants.
///
/// Declared order is significant: expansion and reporting follow it, so the
/// document's author controls which variant appears first. A plain map type
/// would lose that order, hence the custom serde implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    variants: Vec<MatrixVariant>,
}

impl Matrix {
    /// Build a matrix from `(name, bindings)` pairs, keeping their order.
    pub fn from_pairs(pairs: Vec<(String, EnvMap)>) -> Self {
        Self {
            variants: pairs
                .into_iter()
                .map(|(name, bindings)| MatrixVariant { name, bindings })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Iterate variants in declared order.
    pub fn iter(&self) -> impl Iterator<Item = &MatrixVariant> {
        self.variants.iter()
    }
}

impl Serialize for Matrix {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.variants.len()))?;
        for variant in &self.variants {
            map.serialize_entry(&variant.name, &variant.bindings)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Matrix {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MatrixVisitor;

        impl<'de> Visitor<'de> for MatrixVisitor {
            type Value = Matrix;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variant names to variable bindings")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Matrix, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut variants: Vec<MatrixVariant> = Vec::new();
                while let Some((name, bindings)) = access.next_entry::<String, EnvMap>()? {
                    if variants.iter().any(|v| v.name == name) {
                        return Err(de::Error::custom(format!(
                            "duplicate matrix variant '{name}'"
                        )));
                    }
                    variants.push(MatrixVariant { name, bindings });
                }
                Ok(Matrix { variants })
            }
        }

        deserializer.deserialize_map(MatrixVisitor)
    }
}

/// Template for a set of jobs sharing steps and platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobTemplate {
    /// Template name, unique within the document.
    pub name: String,

    /// Whole-job wall clock bound in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Agent pool and optional container image.
    pub platform: PlatformSpec,

    /// Matrix variants; empty means one implicit variant.
    #[serde(default)]
    pub matrix: Matrix,

    /// Template-level variables, overriding run-level variables.
    #[serde(default)]
    pub variables: EnvMap,

    /// Steps executed strictly in order.
    pub steps: Vec<StepSpec>,
}

fn default_timeout_secs() -> u64 {
    3600
}

/// The top-level pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineDocument {
    /// Pipeline name, used in reporting and logs.
    pub name: String,

    /// When to run at all.
    pub trigger: TriggerRule,

    /// Run-level variables, lowest precedence.
    #[serde(default)]
    pub variables: EnvMap,

    /// Upper bound on concurrently running job instances.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Job templates, expanded independently.
    pub jobs: Vec<JobTemplate>,
}

fn default_max_concurrency() -> usize {
    4
}

impl PipelineDocument {
    /// Check the document's structural invariants.
    ///
    /// Fails on: empty pipeline name, no jobs, duplicate job names, a job
    /// without steps, a zero timeout, or an empty pool image.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Configuration(
                "pipeline name must not be empty".to_string(),
            ));
        }
        if self.jobs.is_empty() {
            return Err(EngineError::Configuration(format!(
                "pipeline '{}' declares no jobs",
                self.name
            )));
        }
        if self.max_concurrency == 0 {
            return Err(EngineError::Configuration(format!(
                "pipeline '{}' sets max_concurrency to 0",
                self.name
            )));
        }

        let mut seen = std::collections::BTreeSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "pipeline '{}' contains a job with an empty name",
                    self.name
                )));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
            if job.steps.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "job '{}' declares no steps",
                    job.name
                )));
            }
            if job.timeout_secs == 0 {
                return Err(EngineError::Configuration(format!(
                    "job '{}' sets timeout_secs to 0",
                    job.name
                )));
            }
            if job.platform.pool_image.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "job '{}' has an empty pool image",
                    job.name
                )));
            }
        }
        Ok(())
    }

    /// SHA-256 hex digest of the document's canonical JSON form.
    ///
    /// Variable maps are sorted and matrix variants keep declared order, so
    /// the digest is stable across loads of the same document.
    pub fn digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// The change a host hands to the engine: branch plus touched paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeContext {
    /// Branch the change landed on.
    pub branch: String,

    /// Paths touched by the change. Empty means the diff is unknown.
    #[serde(default)]
    pub changed_paths: Vec<String>,
}
