// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container configuration and runtime state reported by agents.

use crate::id::ContainerId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Compute resources a container declares, or an agent offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Fractional CPU cores.
    pub cpus: f64,
    /// Memory in MB.
    pub memory: u64,
}

/// Volume requirements: host mount point → path inside the container.
/// Placement only matches a config onto agents declaring every
/// requested mount point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
}

/// Grace periods granted to a container around lifecycle transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grace {
    /// Seconds the container is given to reach Running after creation.
    pub startup: u64,
    /// Seconds the container is given to terminate after a stop request.
    pub shutdown: u64,
}

/// Template for a container instance, carried inside a [`crate::Job`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub resources: Resources,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub grace: Grace,
}

/// Lifecycle state of a container instance, as reported by its agent.
///
/// Transitions are unidirectional from the scheduler's point of view:
/// Created → Running → Failed | Finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Failed,
    Finished,
}

impl ContainerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerStatus::Failed | ContainerStatus::Finished)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Failed => "failed",
            ContainerStatus::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}

/// One container instance on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInstance {
    pub id: ContainerId,
    pub status: ContainerStatus,
    pub config: ContainerConfig,
}

/// Full view of an agent's containers, broadcast on every change.
pub type ContainersSnapshot = BTreeMap<ContainerId, ContainerInstance>;

/// Totals an agent offers: CPU count, memory, and declared mount points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostResources {
    pub cpus: f64,
    pub memory: u64,
    #[serde(default)]
    pub volumes: BTreeSet<String>,
}

impl HostResources {
    /// Host totals with nothing allocated yet.
    pub fn to_free(&self) -> FreeResources {
        FreeResources { cpus: self.cpus, memory: self.memory as i64, volumes: self.volumes.clone() }
    }
}

/// What remains of an agent's totals after subtracting allocated and
/// pending containers. Memory is signed: optimistic accounting can
/// briefly go negative when two schedulers share a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FreeResources {
    pub cpus: f64,
    pub memory: i64,
    pub volumes: BTreeSet<String>,
}

impl FreeResources {
    /// Subtract one container's declared resources.
    pub fn subtract(&mut self, resources: &Resources) {
        self.cpus -= resources.cpus;
        self.memory -= resources.memory as i64;
    }
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
