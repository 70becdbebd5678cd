// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent state machine.
//!
//! Wraps one [`AgentProxy`] and keeps the last-known view of the
//! agent's containers and host resources, fed by the agent's event
//! stream. The machine only observes: commands go straight through
//! `proxy()`, and their consequences arrive back as events.

use crate::proxy::AgentProxy;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sv_core::{AgentState, ContainersSnapshot, Endpoint, HostResources};
use sv_wire::AgentEvent;
use tokio::sync::oneshot;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(15);

struct Inner {
    instances: ContainersSnapshot,
    resources: HostResources,
    /// True until the first successful resync, and again whenever the
    /// event stream errors; a dirty view must not drive placement.
    dirty: bool,
    /// Bumped on every applied event or resync, for ordering checks.
    seq: u64,
}

/// Last-known state of one agent, kept fresh by a background event loop.
pub struct StateMachine {
    endpoint: Endpoint,
    proxy: AgentProxy,
    inner: Arc<Mutex<Inner>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StateMachine {
    /// Create the machine and start its event loop.
    pub fn spawn(endpoint: Endpoint) -> Self {
        let proxy = AgentProxy::new(endpoint.clone());
        let inner = Arc::new(Mutex::new(Inner {
            instances: ContainersSnapshot::new(),
            resources: HostResources::default(),
            dirty: true,
            seq: 0,
        }));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run(proxy.clone(), Arc::clone(&inner), shutdown_rx));

        Self { endpoint, proxy, inner, shutdown: Some(shutdown_tx) }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Handle for direct operations. The machine does not mediate
    /// commands, only observes their consequences.
    pub fn proxy(&self) -> AgentProxy {
        self.proxy.clone()
    }

    /// Last-known container instances; a prefix of the event stream.
    pub fn snapshot(&self) -> ContainersSnapshot {
        self.inner.lock().instances.clone()
    }

    pub fn dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn seq(&self) -> u64 {
        self.inner.lock().seq
    }

    /// Full introspection view of this agent.
    pub fn agent_state(&self) -> AgentState {
        let inner = self.inner.lock();
        AgentState {
            dirty: inner.dirty,
            host_resources: inner.resources.clone(),
            container_instances: inner.instances.clone(),
        }
    }

    /// Terminate the event loop and close the stream.
    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn run(proxy: AgentProxy, inner: Arc<Mutex<Inner>>, mut shutdown_rx: oneshot::Receiver<()>) {
    let endpoint = proxy.endpoint().clone();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => return,
            result = proxy.events() => match result {
                Ok(mut stream) => {
                    if resync(&proxy, &inner).await {
                        tracing::debug!(%endpoint, "state machine synced");
                        backoff = INITIAL_BACKOFF;
                    }

                    loop {
                        tokio::select! {
                            _ = &mut shutdown_rx => return,
                            event = stream.next() => match event {
                                Ok(Some(event)) => apply_event(&inner, event),
                                Ok(None) => {
                                    tracing::warn!(%endpoint, "event stream closed");
                                    mark_dirty(&inner);
                                    break;
                                }
                                Err(e) => {
                                    tracing::warn!(%endpoint, %e, "event stream error");
                                    mark_dirty(&inner);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(%endpoint, %e, "event stream connect failed");
                    mark_dirty(&inner);
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown_rx => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Fetch a full snapshot after (re)connecting. Only a fully successful
/// resync clears the dirty bit.
async fn resync(proxy: &AgentProxy, inner: &Arc<Mutex<Inner>>) -> bool {
    let containers = proxy.containers().await;
    let resources = proxy.resources().await;
    match (containers, resources) {
        (Ok(containers), Ok(resources)) => {
            let mut inner = inner.lock();
            inner.instances = containers;
            inner.resources = resources;
            inner.dirty = false;
            inner.seq += 1;
            true
        }
        (containers, resources) => {
            if let Err(e) = containers.as_ref() {
                tracing::warn!(endpoint = %proxy.endpoint(), %e, "resync containers failed");
            }
            if let Err(e) = resources.as_ref() {
                tracing::warn!(endpoint = %proxy.endpoint(), %e, "resync resources failed");
            }
            false
        }
    }
}

/// Replace the local view atomically with the event's payload.
fn apply_event(inner: &Arc<Mutex<Inner>>, event: AgentEvent) {
    let mut inner = inner.lock();
    match event {
        AgentEvent::Containers(snapshot) => inner.instances = snapshot,
        AgentEvent::Resources(resources) => inner.resources = resources,
    }
    inner.seq += 1;
}

fn mark_dirty(inner: &Arc<Mutex<Inner>>) {
    inner.lock().dirty = true;
}

#[cfg(test)]
#[path = "state_machine_tests.rs"]
mod tests;
