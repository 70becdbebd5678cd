// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic counters exposed through the introspection endpoints.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Agent-side counters: log routing plus state-broadcast drops.
#[derive(Debug, Default)]
pub struct AgentCounters {
    pub log_received_lines: Counter,
    pub log_unparsable_lines: Counter,
    pub log_unroutable_lines: Counter,
    pub log_deliverable_lines: Counter,
    pub log_undelivered_lines: Counter,
    /// Snapshot broadcasts dropped on slow instance-registry subscribers.
    pub state_undelivered_snapshots: Counter,
}

/// Serialized view of [`AgentCounters`] for `GET /metrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCountersSnapshot {
    pub log_received_lines: u64,
    pub log_unparsable_lines: u64,
    pub log_unroutable_lines: u64,
    pub log_deliverable_lines: u64,
    pub log_undelivered_lines: u64,
    pub state_undelivered_snapshots: u64,
}

impl AgentCounters {
    pub fn snapshot(&self) -> AgentCountersSnapshot {
        AgentCountersSnapshot {
            log_received_lines: self.log_received_lines.get(),
            log_unparsable_lines: self.log_unparsable_lines.get(),
            log_unroutable_lines: self.log_unroutable_lines.get(),
            log_deliverable_lines: self.log_deliverable_lines.get(),
            log_undelivered_lines: self.log_undelivered_lines.get(),
            state_undelivered_snapshots: self.state_undelivered_snapshots.get(),
        }
    }
}

/// Scheduler-side counters.
#[derive(Debug, Default)]
pub struct SchedulerCounters {
    pub task_schedule_requests: Counter,
    pub task_unschedule_requests: Counter,
    pub containers_placed: Counter,
    pub job_schedule_requests: Counter,
    pub job_unschedule_requests: Counter,
}

/// Serialized view of [`SchedulerCounters`] for `GET /`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerCountersSnapshot {
    pub task_schedule_requests: u64,
    pub task_unschedule_requests: u64,
    pub containers_placed: u64,
    pub job_schedule_requests: u64,
    pub job_unschedule_requests: u64,
}

impl SchedulerCounters {
    pub fn snapshot(&self) -> SchedulerCountersSnapshot {
        SchedulerCountersSnapshot {
            task_schedule_requests: self.task_schedule_requests.get(),
            task_unschedule_requests: self.task_unschedule_requests.get(),
            containers_placed: self.containers_placed.get(),
            job_schedule_requests: self.job_schedule_requests.get(),
            job_unschedule_requests: self.job_unschedule_requests.get(),
        }
    }
}
