// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container runtime seam.
//!
//! The actual container engine is an external collaborator; the agent
//! drives it through this trait and observes progress as status
//! transitions on the instance registry. The in-tree
//! [`SupervisedRuntime`] is a process-less supervisor used by the
//! daemon's default configuration and by tests.

use crate::registry::InstanceRegistry;
use async_trait::async_trait;
use std::time::Duration;
use sv_core::{ContainerConfig, ContainerId, ContainerStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container {id} failed to launch: {reason}")]
    Launch { id: ContainerId, reason: String },
}

/// Starts and stops containers, reporting transitions through the
/// registry.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Bring a Created container up. Implementations move it to
    /// Running, or to Failed when the launch dies.
    async fn start(
        &self,
        registry: &InstanceRegistry,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<(), RuntimeError>;

    /// Terminate a live container; it ends Finished.
    async fn stop(&self, registry: &InstanceRegistry, id: &ContainerId)
        -> Result<(), RuntimeError>;
}

/// In-process supervisor: containers "run" as registry entries only.
pub struct SupervisedRuntime {
    /// Simulated launch time before a container reaches Running.
    start_delay: Duration,
}

impl SupervisedRuntime {
    pub fn new() -> Self {
        Self { start_delay: Duration::ZERO }
    }

    pub fn with_start_delay(start_delay: Duration) -> Self {
        Self { start_delay }
    }
}

impl Default for SupervisedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for SupervisedRuntime {
    async fn start(
        &self,
        registry: &InstanceRegistry,
        id: &ContainerId,
        _config: &ContainerConfig,
    ) -> Result<(), RuntimeError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        registry.advance_status(id, ContainerStatus::Running);
        Ok(())
    }

    async fn stop(
        &self,
        registry: &InstanceRegistry,
        id: &ContainerId,
    ) -> Result<(), RuntimeError> {
        registry.advance_status(id, ContainerStatus::Finished);
        Ok(())
    }
}
