// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job definitions submitted to the scheduler.

use crate::container::ContainerConfig;
use crate::id::ContainerId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A client-submitted job: a container template scaled to N instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_name: String,
    pub container_config: ContainerConfig,
    pub scale: u32,
}

/// Validation errors for client-submitted jobs.
#[derive(Debug, Error, PartialEq)]
pub enum JobError {
    #[error("job name must not be empty")]
    EmptyName,

    #[error("job name {0:?} may only contain [a-zA-Z0-9_-]")]
    InvalidName(String),

    #[error("scale must be at least 1")]
    ZeroScale,

    #[error("container resources must be positive (cpus {cpus}, memory {memory} MB)")]
    InvalidResources { cpus: f64, memory: u64 },
}

impl Job {
    /// Check the job is well-formed before it may enter the registry.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.job_name.is_empty() {
            return Err(JobError::EmptyName);
        }
        if !self.job_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(JobError::InvalidName(self.job_name.clone()));
        }
        if self.scale == 0 {
            return Err(JobError::ZeroScale);
        }
        let resources = &self.container_config.resources;
        if resources.cpus <= 0.0 || resources.memory == 0 {
            return Err(JobError::InvalidResources {
                cpus: resources.cpus,
                memory: resources.memory,
            });
        }
        Ok(())
    }

    /// 7-hex-digit digest of the canonical encoding of this job.
    ///
    /// The encoding goes through `serde_json::Value`, whose maps are
    /// key-sorted, so the digest is stable across runs and restarts
    /// regardless of field insertion order.
    pub fn ref_hash(&self) -> String {
        let canonical = serde_json::to_value(self)
            .and_then(|v| serde_json::to_string(&v))
            .unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        let hex = digest.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        hex[..7].to_string()
    }

    /// The container IDs this job expands to: one per instance index.
    pub fn container_ids(&self) -> Vec<ContainerId> {
        let hash = self.ref_hash();
        (0..self.scale).map(|i| ContainerId::derive(&self.job_name, &hash, i)).collect()
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
