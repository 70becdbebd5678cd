// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desired-state buckets and the signal reducer.
//!
//! [`RegistryState`] is pure data plus transitions; persistence and
//! broadcast live in the scheduler's registry task. Keeping the reducer
//! here lets property tests drive arbitrary operation sequences without
//! spinning up channels or files.

use crate::container::{ContainerInstance, ContainersSnapshot, HostResources};
use crate::id::ContainerId;
use crate::job::Job;
use crate::signal::SchedulingSignal;
use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The three disjoint desired-state buckets, keyed by container ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub pending_schedule: BTreeMap<ContainerId, TaskSpec>,
    #[serde(default)]
    pub scheduled: BTreeMap<ContainerId, TaskSpec>,
    #[serde(default)]
    pub pending_unschedule: BTreeMap<ContainerId, TaskSpec>,
}

/// Rejections for registry mutations.
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("job {job}: container {id} is already scheduled")]
    AlreadyScheduled { job: String, id: ContainerId },

    #[error("job {0} is not scheduled")]
    NotScheduled(String),
}

/// Whether a signal changed anything; `Ignored` means the ID was not in
/// a bucket the signal applies to, which the caller logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Applied,
    Ignored,
}

impl RegistryState {
    pub fn contains(&self, id: &ContainerId) -> bool {
        self.pending_schedule.contains_key(id)
            || self.scheduled.contains_key(id)
            || self.pending_unschedule.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending_schedule.is_empty()
            && self.scheduled.is_empty()
            && self.pending_unschedule.is_empty()
    }

    /// Expand a job into pending-schedule entries. Rejects the whole job
    /// if any target ID already exists anywhere.
    pub fn schedule(&mut self, job: &Job) -> Result<(), StateError> {
        let ids = job.container_ids();
        if let Some(id) = ids.iter().find(|id| self.contains(id)) {
            return Err(StateError::AlreadyScheduled {
                job: job.job_name.clone(),
                id: id.clone(),
            });
        }
        for id in ids {
            self.pending_schedule.insert(
                id.clone(),
                TaskSpec {
                    endpoint: None,
                    job_name: job.job_name.clone(),
                    container_id: id,
                    config: job.container_config.clone(),
                },
            );
        }
        Ok(())
    }

    /// Move a job's scheduled containers into pending-unschedule.
    pub fn unschedule(&mut self, job: &Job) -> Result<(), StateError> {
        let mut moved = 0;
        for id in job.container_ids() {
            if let Some(spec) = self.scheduled.remove(&id) {
                self.pending_unschedule.insert(id, spec);
                moved += 1;
            }
        }
        if moved == 0 {
            return Err(StateError::NotScheduled(job.job_name.clone()));
        }
        Ok(())
    }

    /// Apply one scheduling signal.
    pub fn apply_signal(&mut self, id: &ContainerId, signal: &SchedulingSignal) -> SignalOutcome {
        match signal {
            SchedulingSignal::ScheduleSuccessful { endpoint } => {
                match self.pending_schedule.remove(id) {
                    Some(mut spec) => {
                        spec.endpoint = Some(endpoint.clone());
                        self.scheduled.insert(id.clone(), spec);
                        SignalOutcome::Applied
                    }
                    None => SignalOutcome::Ignored,
                }
            }

            SchedulingSignal::UnscheduleSuccessful => match self.pending_unschedule.remove(id) {
                Some(_) => SignalOutcome::Applied,
                None => SignalOutcome::Ignored,
            },

            // Retried from the same bucket on the next reconciliation.
            SchedulingSignal::ContainerPutFailed | SchedulingSignal::ContainerStartFailed => {
                match self.pending_schedule.contains_key(id) {
                    true => SignalOutcome::Applied,
                    false => SignalOutcome::Ignored,
                }
            }
            SchedulingSignal::ContainerStopFailed | SchedulingSignal::ContainerDeleteFailed => {
                match self.pending_unschedule.contains_key(id) {
                    true => SignalOutcome::Applied,
                    false => SignalOutcome::Ignored,
                }
            }

            SchedulingSignal::AgentUnavailable => {
                // A pending spec bound to a vanished agent must be
                // re-placed, so the stale binding is cleared.
                match self.pending_schedule.get_mut(id) {
                    Some(spec) => {
                        spec.endpoint = None;
                        SignalOutcome::Applied
                    }
                    None => {
                        if self.contains(id) {
                            SignalOutcome::Applied
                        } else {
                            SignalOutcome::Ignored
                        }
                    }
                }
            }

            SchedulingSignal::ContainerLost => {
                if let Some(mut spec) = self.scheduled.remove(id) {
                    spec.endpoint = None;
                    self.pending_schedule.insert(id.clone(), spec);
                    return SignalOutcome::Applied;
                }
                // The container is gone along with its agent, which is
                // what unscheduling was waiting for.
                if self.pending_unschedule.remove(id).is_some() {
                    return SignalOutcome::Applied;
                }
                if let Some(spec) = self.pending_schedule.get_mut(id) {
                    spec.endpoint = None;
                    return SignalOutcome::Applied;
                }
                SignalOutcome::Ignored
            }
        }
    }
}

/// One agent's last-known state, serialized for introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// When true, the report may be stale and must not drive placement.
    pub dirty: bool,
    pub host_resources: HostResources,
    pub container_instances: ContainersSnapshot,
}

impl AgentState {
    pub fn instance(&self, id: &ContainerId) -> Option<&ContainerInstance> {
        self.container_instances.get(id)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
