// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side catalog of local container instances.
//!
//! State changes are broadcast to subscribers with non-blocking sends:
//! a slow subscriber stays registered but its dropped snapshots are
//! counted, and a closed one is pruned. Log fanout per container works
//! the same way and never blocks the router.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use sv_core::metrics::AgentCounters;
use sv_core::{ContainerId, ContainerInstance, ContainerStatus, ContainersSnapshot};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq)]
pub enum RegisterError {
    #[error("container {0} already exists")]
    Conflict(ContainerId),
}

/// Result of a deregistration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deregistered {
    Removed,
    /// Unknown ID; deleting twice is allowed.
    NotFound,
    /// The container is still live and must be stopped first.
    StillLive,
}

struct HandleInner {
    instance: Mutex<ContainerInstance>,
    watchers: Mutex<Vec<mpsc::Sender<String>>>,
    counters: Arc<AgentCounters>,
}

/// Shared handle for one local container.
#[derive(Clone)]
pub struct ContainerHandle {
    inner: Arc<HandleInner>,
}

impl ContainerHandle {
    fn new(instance: ContainerInstance, counters: Arc<AgentCounters>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                instance: Mutex::new(instance),
                watchers: Mutex::new(Vec::new()),
                counters,
            }),
        }
    }

    pub fn id(&self) -> ContainerId {
        self.inner.instance.lock().id.clone()
    }

    pub fn instance(&self) -> ContainerInstance {
        self.inner.instance.lock().clone()
    }

    pub fn status(&self) -> ContainerStatus {
        self.inner.instance.lock().status
    }

    /// Register a log watcher. Each routable line is delivered with a
    /// non-blocking send.
    pub fn watch_logs(&self, tx: mpsc::Sender<String>) {
        self.inner.watchers.lock().push(tx);
    }

    /// Fan one log line out to every watcher. A full watcher is
    /// skipped and counted, never waited on; a closed one is pruned.
    pub fn route_log(&self, message: &str) {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|tx| match tx.try_send(message.to_string()) {
            Ok(()) => {
                self.inner.counters.log_deliverable_lines.inc();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.counters.log_undelivered_lines.inc();
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Advance the status if the transition is forward; lifecycle never
    /// moves backwards. Returns the new status on change.
    fn advance(&self, status: ContainerStatus) -> Option<ContainerStatus> {
        let mut instance = self.inner.instance.lock();
        let allowed = match (instance.status, status) {
            (ContainerStatus::Created, ContainerStatus::Running)
            | (ContainerStatus::Created, ContainerStatus::Failed)
            | (ContainerStatus::Created, ContainerStatus::Finished)
            | (ContainerStatus::Running, ContainerStatus::Failed)
            | (ContainerStatus::Running, ContainerStatus::Finished) => true,
            _ => false,
        };
        if !allowed {
            return None;
        }
        instance.status = status;
        Some(status)
    }
}

struct RegistryInner {
    handles: BTreeMap<ContainerId, ContainerHandle>,
    subscribers: Vec<mpsc::Sender<ContainersSnapshot>>,
}

/// The agent's in-process instance store.
pub struct InstanceRegistry {
    inner: Mutex<RegistryInner>,
    counters: Arc<AgentCounters>,
}

impl InstanceRegistry {
    pub fn new(counters: Arc<AgentCounters>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                handles: BTreeMap::new(),
                subscribers: Vec::new(),
            }),
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<AgentCounters> {
        &self.counters
    }

    /// Add a new container in Created state. A live container with the
    /// same ID conflicts; a terminal one is replaced (restart).
    pub fn register(
        &self,
        id: ContainerId,
        config: sv_core::ContainerConfig,
    ) -> Result<ContainerHandle, RegisterError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.handles.get(&id) {
            if !existing.status().is_terminal() {
                return Err(RegisterError::Conflict(id));
            }
        }
        let handle = ContainerHandle::new(
            ContainerInstance { id: id.clone(), status: ContainerStatus::Created, config },
            Arc::clone(&self.counters),
        );
        inner.handles.insert(id, handle.clone());
        broadcast(&mut inner, &self.counters);
        Ok(handle)
    }

    /// Remove a terminal container.
    pub fn deregister(&self, id: &ContainerId) -> Deregistered {
        let mut inner = self.inner.lock();
        match inner.handles.get(id) {
            None => Deregistered::NotFound,
            Some(handle) if !handle.status().is_terminal() => Deregistered::StillLive,
            Some(_) => {
                inner.handles.remove(id);
                broadcast(&mut inner, &self.counters);
                Deregistered::Removed
            }
        }
    }

    pub fn get(&self, id: &ContainerId) -> Option<ContainerHandle> {
        self.inner.lock().handles.get(id).cloned()
    }

    /// Snapshot of every local instance.
    pub fn list(&self) -> ContainersSnapshot {
        let inner = self.inner.lock();
        inner.handles.values().map(|h| (h.id(), h.instance())).collect()
    }

    /// Register a snapshot subscriber; the current state is delivered
    /// immediately.
    pub fn subscribe(&self, tx: mpsc::Sender<ContainersSnapshot>) {
        let mut inner = self.inner.lock();
        let snapshot: ContainersSnapshot =
            inner.handles.values().map(|h| (h.id(), h.instance())).collect();
        if tx.try_send(snapshot).is_err() {
            self.counters.state_undelivered_snapshots.inc();
        }
        inner.subscribers.push(tx);
    }

    /// Advance a container's status and broadcast the change.
    pub fn advance_status(&self, id: &ContainerId, status: ContainerStatus) -> bool {
        let handle = match self.get(id) {
            Some(handle) => handle,
            None => return false,
        };
        match handle.advance(status) {
            None => false,
            Some(status) => {
                tracing::debug!(%id, %status, "container status");
                let mut inner = self.inner.lock();
                broadcast(&mut inner, &self.counters);
                true
            }
        }
    }
}

fn broadcast(inner: &mut RegistryInner, counters: &AgentCounters) {
    let snapshot: ContainersSnapshot =
        inner.handles.values().map(|h| (h.id(), h.instance())).collect();
    inner.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            counters.state_undelivered_snapshots.inc();
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
