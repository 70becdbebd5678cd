// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON bodies for the scheduler and agent HTTP surfaces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sv_core::{
    AgentCountersSnapshot, AgentState, ContainersSnapshot, Endpoint, HostResources, RegistryState,
    SchedulerCountersSnapshot,
};

/// 200 body for scheduler mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub message: String,
}

/// Error body for any non-2xx answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status_code: u16,
    pub status_text: String,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl std::fmt::Display) -> Self {
        Self {
            status_code: status,
            status_text: crate::http::status_text(status).to_string(),
            error: error.to_string(),
        }
    }
}

/// `GET /` on the scheduler: desired state plus the fleet view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub registry: RegistryState,
    pub agents: BTreeMap<Endpoint, AgentState>,
    pub counters: SchedulerCountersSnapshot,
}

/// One value per line on the agent's `/events` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    /// Full view of the agent's containers after a change.
    Containers(ContainersSnapshot),
    /// The agent's declared totals (sent once per (re)connect).
    Resources(HostResources),
}

/// `GET /metrics` on the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentIntrospection {
    pub resources: HostResources,
    pub containers: ContainersSnapshot,
    pub counters: AgentCountersSnapshot,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
