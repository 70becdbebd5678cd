// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling signals: outcomes the transformer reports back to the
//! registry after acting on a single container.

use crate::task::Endpoint;
use serde::{Deserialize, Serialize};

/// Outcome of one scheduling action, keyed by container ID at the
/// registry. Failure signals leave the spec in its current bucket so
/// the next reconciliation retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingSignal {
    /// The container reached Running. Carries the endpoint placement
    /// chose so the registry can bind it.
    ScheduleSuccessful { endpoint: Endpoint },
    /// The container was stopped and deleted.
    UnscheduleSuccessful,
    /// PUT to the agent failed.
    ContainerPutFailed,
    /// The container never reached Running within its startup grace.
    ContainerStartFailed,
    /// Stop failed, or the container never terminated within its
    /// shutdown grace.
    ContainerStopFailed,
    /// DELETE to the agent failed.
    ContainerDeleteFailed,
    /// No state machine exists for the target endpoint.
    AgentUnavailable,
    /// The agent that held this container disappeared from discovery.
    ContainerLost,
}

impl std::fmt::Display for SchedulingSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchedulingSignal::ScheduleSuccessful { .. } => "schedule-successful",
            SchedulingSignal::UnscheduleSuccessful => "unschedule-successful",
            SchedulingSignal::ContainerPutFailed => "container-put-failed",
            SchedulingSignal::ContainerStartFailed => "container-start-failed",
            SchedulingSignal::ContainerStopFailed => "container-stop-failed",
            SchedulingSignal::ContainerDeleteFailed => "container-delete-failed",
            SchedulingSignal::AgentUnavailable => "agent-unavailable",
            SchedulingSignal::ContainerLost => "container-lost",
        };
        write!(f, "{}", s)
    }
}
