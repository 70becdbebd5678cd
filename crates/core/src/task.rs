// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task specs: one desired container instance bound (or not yet bound)
//! to an agent endpoint.

use crate::container::ContainerConfig;
use crate::id::ContainerId;
use serde::{Deserialize, Serialize};

/// Base address of an agent's HTTP surface, e.g. `127.0.0.1:3333`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One desired container instance.
///
/// `endpoint` is `None` until placement binds the task to an agent; a
/// container restored to pending-schedule after its agent was lost has
/// the binding cleared again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub endpoint: Option<Endpoint>,
    pub job_name: String,
    pub container_id: ContainerId,
    pub config: ContainerConfig,
}
