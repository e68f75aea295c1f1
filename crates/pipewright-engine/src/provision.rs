//! Build agent provisioning.
//!
//! An [`ExecutionUnit`] stands for one provisioned agent slot: an identity,
//! the images it was provisioned from, and a private working directory whose
//! lifetime the unit owns. The [`Provisioner`] trait keeps agent acquisition
//! behind a seam so the scheduler never knows whether units are local
//! scratch directories or something heavier.

use async_trait::async_trait;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

use pipewright_core::error::{EngineError, Result};
use pipewright_core::ResolvedPlatform;

/// One provisioned agent slot.
#[derive(Debug)]
pub struct ExecutionUnit {
    /// Unique unit id.
    pub id: Uuid,

    /// Pool image the unit was provisioned from.
    pub pool_image: String,

    /// Container image, already variable-resolved.
    pub container_image: Option<String>,

    /// Private working directory for the job's steps.
    pub workdir: PathBuf,

    // Owned scratch dir; dropped (and deleted) on release.
    scratch: Option<TempDir>,
}

impl ExecutionUnit {
    /// Unit rooted at an existing directory that the unit does not own.
    pub fn detached(pool_image: impl Into<String>, workdir: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool_image: pool_image.into(),
            container_image: None,
            workdir,
            scratch: None,
        }
    }
}

/// Acquires and releases execution units.
///
/// Every successful `acquire` must be paired with exactly one `release`,
/// whatever the job's outcome.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provision a unit for a job. `job` is the instance display name, used
    /// for error context only.
    async fn acquire(&self, job: &str, platform: &ResolvedPlatform) -> Result<ExecutionUnit>;

    /// Tear the unit down and return its resources.
    async fn release(&self, unit: ExecutionUnit) -> Result<()>;
}

/// Provisioner that backs each unit with a local scratch directory.
#[derive(Debug, Default)]
pub struct LocalProvisioner {
    allowed_pool_images: Option<Vec<String>>,
}

impl LocalProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict acquisition to a fixed set of pool images. Jobs asking for
    /// anything else fail at provisioning time instead of running on an
    /// unexpected host.
    pub fn with_allowed_pool_images(images: Vec<String>) -> Self {
        Self {
            allowed_pool_images: Some(images),
        }
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn acquire(&self, job: &str, platform: &ResolvedPlatform) -> Result<ExecutionUnit> {
        if let Some(allowed) = &self.allowed_pool_images {
            if !allowed.contains(&platform.pool_image) {
                return Err(EngineError::Provisioning {
                    job: job.to_string(),
                    message: format!(
                        "pool image '{}' is not available locally",
                        platform.pool_image
                    ),
                });
            }
        }

        let scratch = TempDir::new().map_err(|e| EngineError::Provisioning {
            job: job.to_string(),
            message: format!("failed to create scratch directory: {e}"),
        })?;

        let unit = ExecutionUnit {
            id: Uuid::new_v4(),
            pool_image: platform.pool_image.clone(),
            container_image: platform.container_image.clone(),
            workdir: scratch.path().to_path_buf(),
            scratch: Some(scratch),
        };
        debug!(unit = %unit.id, job, workdir = %unit.workdir.display(), "provisioned local unit");
        Ok(unit)
    }

    async fn release(&self, unit: ExecutionUnit) -> Result<()> {
        debug!(unit = %unit.id, "releasing local unit");
        if let Some(scratch) = unit.scratch {
            scratch.close()?;
        }
        Ok(())
    }
}
