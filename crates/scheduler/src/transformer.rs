// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The transformer works to make remote agents reflect the desired
//! state encoded in the registry.
//!
//! One loop, event-driven: discovery changes rebuild the state-machine
//! set, registry updates trigger a reconcile pass, and an idle tick
//! forces a pass even when nothing broadcast. Registry updates arrive
//! over a latest-value `watch` edge: actions taken in-loop emit
//! intermediate registry states back at us, and consuming anything but
//! the most recent snapshot could deadlock the loop against its own
//! side effects.

use crate::placement;
use crate::proxy::AgentError;
use crate::registry::Registry;
use crate::state_machine::StateMachine;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use sv_core::metrics::SchedulerCounters;
use sv_core::{
    AgentState, ContainerConfig, ContainerId, ContainerInstance, ContainerStatus, Endpoint,
    RegistryState, SchedulingSignal, TaskSpec,
};
use tokio::sync::{mpsc, oneshot, watch};

/// Slack added on top of a container's grace period before a poll
/// gives up.
const GRACE_SLACK: Duration = Duration::from_millis(500);

/// Consecutive PUT conflicts on one ID before the log level escalates.
const CONFLICT_ESCALATION_THRESHOLD: u32 = 3;

pub struct TransformerConfig {
    /// How often to poll an agent while waiting for a container to
    /// start or stop.
    pub agent_poll_interval: Duration,
    /// Forced reconcile cadence when no registry update arrives.
    pub reconcile_interval: Duration,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            agent_poll_interval: Duration::from_millis(250),
            reconcile_interval: Duration::from_secs(5),
        }
    }
}

/// Cloneable query handle onto the reconciliation loop.
#[derive(Clone)]
pub struct TransformerHandle {
    states_tx: mpsc::Sender<oneshot::Sender<BTreeMap<Endpoint, AgentState>>>,
}

impl TransformerHandle {
    /// Current snapshot of every agent's last-known state, for
    /// introspection. Proxied through the loop that owns the machines.
    pub async fn agent_states(&self) -> BTreeMap<Endpoint, AgentState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.states_tx.send(reply_tx).await.is_err() {
            return BTreeMap::new();
        }
        reply_rx.await.unwrap_or_default()
    }
}

/// Owner of the reconciliation loop. Dropping it stops the loop.
pub struct Transformer {
    handle: TransformerHandle,
    stop_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<oneshot::Receiver<()>>,
}

impl Transformer {
    /// Start the loop against the given discovery stream and registry.
    /// Lost-container sets flow back through `lost_tx`.
    pub fn spawn(
        discovery: watch::Receiver<BTreeSet<Endpoint>>,
        registry: Registry,
        lost_tx: mpsc::Sender<BTreeSet<ContainerId>>,
        counters: Arc<SchedulerCounters>,
        config: TransformerConfig,
        rng: StdRng,
    ) -> Self {
        let (states_tx, states_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(run(Loop {
            discovery,
            registry,
            lost_tx,
            counters,
            config,
            rng,
            states_rx,
            stop_rx,
            done_tx,
        }));

        Self {
            handle: TransformerHandle { states_tx },
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
        }
    }

    pub fn handle(&self) -> TransformerHandle {
        self.handle.clone()
    }

    pub async fn agent_states(&self) -> BTreeMap<Endpoint, AgentState> {
        self.handle.agent_states().await
    }

    /// Stop the loop and every state machine it owns.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(done_rx) = self.done_rx.take() {
            let _ = done_rx.await;
        }
    }
}

struct Loop {
    discovery: watch::Receiver<BTreeSet<Endpoint>>,
    registry: Registry,
    lost_tx: mpsc::Sender<BTreeSet<ContainerId>>,
    counters: Arc<SchedulerCounters>,
    config: TransformerConfig,
    rng: StdRng,
    states_rx: mpsc::Receiver<oneshot::Sender<BTreeMap<Endpoint, AgentState>>>,
    stop_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<()>,
}

async fn run(mut ctx: Loop) {
    let mut machines: BTreeMap<Endpoint, StateMachine> = BTreeMap::new();
    let initial = ctx.discovery.borrow_and_update().clone();
    migrate_agents(&mut machines, initial, &ctx.lost_tx).await;
    tracing::info!(agents = machines.len(), "transformer started");

    let mut updates = ctx.registry.subscribe();
    let mut conflicts: BTreeMap<ContainerId, u32> = BTreeMap::new();
    let mut idle = tokio::time::interval(ctx.config.reconcile_interval);
    idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        // Reconciles run to completion before the next branch is
        // polled, so a racing duplicate schedule cannot double-act on
        // an ID mid-flight.
        tokio::select! {
            result = ctx.discovery.changed() => {
                if result.is_err() {
                    break;
                }
                let endpoints = ctx.discovery.borrow_and_update().clone();
                migrate_agents(&mut machines, endpoints, &ctx.lost_tx).await;
                let desired = updates.borrow_and_update().clone();
                reconcile(&desired, &machines, &mut ctx, &mut conflicts).await;
            }

            result = updates.changed() => {
                if result.is_err() {
                    break;
                }
                let desired = updates.borrow_and_update().clone();
                reconcile(&desired, &machines, &mut ctx, &mut conflicts).await;
            }

            _ = idle.tick() => {
                let desired = updates.borrow_and_update().clone();
                reconcile(&desired, &machines, &mut ctx, &mut conflicts).await;
            }

            Some(reply) = ctx.states_rx.recv() => {
                let _ = reply.send(snapshot_states(&machines));
            }

            _ = &mut ctx.stop_rx => break,
        }
    }

    for (_, machine) in std::mem::take(&mut machines) {
        machine.stop();
    }
    let _ = ctx.done_tx.send(());
}

/// Rebuild the state-machine set for a new discovery result, keeping
/// surviving machines (and their cached state). Containers known to a
/// lost machine are reported so the registry re-places them.
async fn migrate_agents(
    machines: &mut BTreeMap<Endpoint, StateMachine>,
    next: BTreeSet<Endpoint>,
    lost_tx: &mpsc::Sender<BTreeSet<ContainerId>>,
) {
    let previous = std::mem::take(machines);
    let mut lost = Vec::new();
    for (endpoint, machine) in previous {
        if next.contains(&endpoint) {
            machines.insert(endpoint, machine);
        } else {
            lost.push(machine);
        }
    }

    for endpoint in next {
        if !machines.contains_key(&endpoint) {
            tracing::info!(%endpoint, "agent discovered");
            machines.insert(endpoint.clone(), StateMachine::spawn(endpoint));
        }
    }

    for machine in lost {
        let ids: BTreeSet<ContainerId> = machine.snapshot().keys().cloned().collect();
        tracing::warn!(endpoint = %machine.endpoint(), containers = ids.len(), "agent lost");
        if !ids.is_empty() {
            let _ = lost_tx.send(ids).await;
        }
        machine.stop();
    }
}

fn snapshot_states(machines: &BTreeMap<Endpoint, StateMachine>) -> BTreeMap<Endpoint, AgentState> {
    machines.iter().map(|(endpoint, machine)| (endpoint.clone(), machine.agent_state())).collect()
}

/// Actual fleet state keyed by container ID.
fn group_by_id(
    states: &BTreeMap<Endpoint, AgentState>,
) -> BTreeMap<ContainerId, (Endpoint, ContainerInstance)> {
    let mut by_id = BTreeMap::new();
    for (endpoint, state) in states {
        for (id, instance) in &state.container_instances {
            by_id.insert(id.clone(), (endpoint.clone(), instance.clone()));
        }
    }
    by_id
}

/// Diff desired against actual.
///
/// Containers that should exist are pending-schedule plus scheduled;
/// pending-unschedule is deliberately not part of that set, which is
/// what routes its live instances into `to_unschedule`.
pub(crate) fn diff(
    desired: &RegistryState,
    actual: &BTreeMap<ContainerId, (Endpoint, ContainerInstance)>,
) -> Diff {
    let mut result = Diff::default();

    let want: BTreeMap<&ContainerId, &TaskSpec> =
        desired.pending_schedule.iter().chain(desired.scheduled.iter()).collect();

    for (id, spec) in &want {
        match actual.get(*id) {
            // The only way instances get lost is when their agent
            // disappears; until then we keep them running wherever
            // they are.
            None => match &spec.endpoint {
                Some(_) => {
                    result.to_schedule.insert((*id).clone(), (*spec).clone());
                }
                None => {
                    result.needs_placement.insert((*id).clone(), (*spec).clone());
                }
            },

            Some((endpoint, instance)) => match instance.status {
                ContainerStatus::Created
                | ContainerStatus::Running
                | ContainerStatus::Finished => {
                    if let Some(want_endpoint) = &spec.endpoint {
                        if want_endpoint != endpoint {
                            // Exists on the wrong agent: tear down the
                            // stray copy and start the desired one.
                            result.to_unschedule.insert(
                                (*id).clone(),
                                TaskSpec {
                                    endpoint: Some(endpoint.clone()),
                                    job_name: spec.job_name.clone(),
                                    container_id: (*id).clone(),
                                    config: instance.config.clone(),
                                },
                            );
                            result.to_schedule.insert((*id).clone(), (*spec).clone());
                        }
                    }
                }

                ContainerStatus::Failed => {
                    let mut spec = (*spec).clone();
                    if spec.endpoint.is_none() {
                        spec.endpoint = Some(endpoint.clone());
                    }
                    result.to_schedule.insert((*id).clone(), spec);
                }
            },
        }
    }

    for (id, (endpoint, instance)) in actual {
        if want.contains_key(id) {
            continue;
        }
        // Prefer the pending-unschedule spec when we have it; an
        // instance nothing knows about gets a synthesized spec from
        // its reported config.
        let spec = desired.pending_unschedule.get(id).cloned().unwrap_or_else(|| TaskSpec {
            endpoint: None,
            job_name: String::new(),
            container_id: id.clone(),
            config: instance.config.clone(),
        });
        result.to_unschedule.insert(
            id.clone(),
            TaskSpec { endpoint: Some(endpoint.clone()), ..spec },
        );
    }

    result
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Diff {
    pub to_schedule: BTreeMap<ContainerId, TaskSpec>,
    pub to_unschedule: BTreeMap<ContainerId, TaskSpec>,
    pub needs_placement: BTreeMap<ContainerId, TaskSpec>,
}

/// Desired specs already bound to an agent but not visible in actual
/// yet; placement must count their resources as spoken for.
fn in_flight(
    desired: &RegistryState,
    actual: &BTreeMap<ContainerId, (Endpoint, ContainerInstance)>,
) -> BTreeMap<ContainerId, TaskSpec> {
    desired
        .pending_schedule
        .iter()
        .chain(desired.scheduled.iter())
        .filter(|(id, spec)| spec.endpoint.is_some() && !actual.contains_key(*id))
        .map(|(id, spec)| (id.clone(), spec.clone()))
        .collect()
}

async fn reconcile(
    desired: &RegistryState,
    machines: &BTreeMap<Endpoint, StateMachine>,
    ctx: &mut Loop,
    conflicts: &mut BTreeMap<ContainerId, u32>,
) {
    let states = snapshot_states(machines);
    let actual = group_by_id(&states);
    let mut diff = diff(desired, &actual);

    if !diff.needs_placement.is_empty() {
        // Dirty agents may be misreporting; they take no new work.
        let clean: BTreeMap<Endpoint, AgentState> =
            states.iter().filter(|(_, s)| !s.dirty).map(|(e, s)| (e.clone(), s.clone())).collect();
        let pending = in_flight(desired, &actual);
        let configs: BTreeMap<ContainerId, ContainerConfig> = diff
            .needs_placement
            .iter()
            .map(|(id, spec)| (id.clone(), spec.config.clone()))
            .collect();

        let placement = placement::random_fit(&configs, &clean, &pending, &mut ctx.rng);
        let placed: u64 = placement.mapping.values().map(|m| m.len() as u64).sum();
        ctx.counters.containers_placed.add(placed);

        for (endpoint, tasks) in placement.mapping {
            for id in tasks.into_keys() {
                if let Some(mut spec) = diff.needs_placement.remove(&id) {
                    spec.endpoint = Some(endpoint.clone());
                    diff.to_schedule.insert(id, spec);
                }
            }
        }
        for id in placement.unscheduled.into_keys() {
            tracing::warn!(%id, "no agent can fit container");
            ctx.registry.signal(id, SchedulingSignal::AgentUnavailable).await;
        }
    }

    ctx.counters.task_schedule_requests.add(diff.to_schedule.len() as u64);
    ctx.counters.task_unschedule_requests.add(diff.to_unschedule.len() as u64);

    for (id, spec) in diff.to_schedule {
        tracing::info!(%id, endpoint = ?spec.endpoint, "triggering schedule");
        let signal =
            schedule_one(&id, &spec, machines, ctx.config.agent_poll_interval, conflicts).await;
        ctx.registry.signal(id, signal).await;
    }
    for (id, spec) in diff.to_unschedule {
        tracing::info!(%id, endpoint = ?spec.endpoint, "triggering unschedule");
        let signal = unschedule_one(&id, &spec, machines, ctx.config.agent_poll_interval).await;
        ctx.registry.signal(id, signal).await;
    }
}

async fn schedule_one(
    id: &ContainerId,
    spec: &TaskSpec,
    machines: &BTreeMap<Endpoint, StateMachine>,
    poll_interval: Duration,
    conflicts: &mut BTreeMap<ContainerId, u32>,
) -> SchedulingSignal {
    let Some(endpoint) = spec.endpoint.clone() else {
        return SchedulingSignal::AgentUnavailable;
    };
    let Some(machine) = machines.get(&endpoint) else {
        tracing::warn!(%endpoint, %id, "agent unavailable");
        return SchedulingSignal::AgentUnavailable;
    };
    let proxy = machine.proxy();

    if let Err(e) = proxy.put(id, &spec.config).await {
        if matches!(e, AgentError::Conflict(_)) {
            let count = conflicts.entry(id.clone()).or_insert(0);
            *count += 1;
            if *count >= CONFLICT_ESCALATION_THRESHOLD {
                tracing::error!(%endpoint, %id, attempts = *count, %e, "PUT container keeps conflicting");
            } else {
                tracing::warn!(%endpoint, %id, %e, "PUT container failed");
            }
        } else {
            tracing::warn!(%endpoint, %id, %e, "PUT container failed");
        }
        return SchedulingSignal::ContainerPutFailed;
    }
    conflicts.remove(id);

    // Block until the container leaves Created. Tracking in-flight IDs
    // instead would be state this loop cannot share with a second
    // scheduler running against the same registry.
    let deadline = Duration::from_secs(spec.config.grace.startup) + GRACE_SLACK;
    let poll = async {
        loop {
            tokio::time::sleep(poll_interval).await;
            match proxy.get(id).await {
                Err(e) => {
                    tracing::warn!(%endpoint, %id, %e, "GET container failed");
                    return SchedulingSignal::ContainerStartFailed;
                }
                Ok(instance) => match instance.status {
                    ContainerStatus::Created => continue,
                    ContainerStatus::Running => {
                        return SchedulingSignal::ScheduleSuccessful { endpoint: endpoint.clone() }
                    }
                    status => {
                        tracing::warn!(%endpoint, %id, %status, "container failed to start");
                        return SchedulingSignal::ContainerStartFailed;
                    }
                },
            }
        }
    };
    match tokio::time::timeout(deadline, poll).await {
        Ok(signal) => signal,
        Err(_) => {
            tracing::warn!(%endpoint, %id, grace = spec.config.grace.startup, "start timed out");
            SchedulingSignal::ContainerStartFailed
        }
    }
}

async fn unschedule_one(
    id: &ContainerId,
    spec: &TaskSpec,
    machines: &BTreeMap<Endpoint, StateMachine>,
    poll_interval: Duration,
) -> SchedulingSignal {
    // Unscheduling is a dance: stop, poll until terminal, delete.
    let Some(endpoint) = spec.endpoint.clone() else {
        return SchedulingSignal::AgentUnavailable;
    };
    let Some(machine) = machines.get(&endpoint) else {
        tracing::warn!(%endpoint, %id, "agent unavailable");
        return SchedulingSignal::AgentUnavailable;
    };
    let proxy = machine.proxy();

    if let Err(e) = proxy.stop(id).await {
        tracing::warn!(%endpoint, %id, %e, "stop container failed");
        return SchedulingSignal::ContainerStopFailed;
    }

    let deadline = Duration::from_secs(spec.config.grace.shutdown) + GRACE_SLACK;
    let poll = async {
        loop {
            tokio::time::sleep(poll_interval).await;
            match proxy.get(id).await {
                Err(e) => {
                    tracing::warn!(%endpoint, %id, %e, "GET container failed");
                    return Err(SchedulingSignal::ContainerStopFailed);
                }
                Ok(instance) if instance.status.is_terminal() => return Ok(()),
                Ok(_) => continue,
            }
        }
    };
    match tokio::time::timeout(deadline, poll).await {
        Ok(Ok(())) => {}
        Ok(Err(signal)) => return signal,
        Err(_) => {
            tracing::warn!(%endpoint, %id, grace = spec.config.grace.shutdown, "stop timed out");
            return SchedulingSignal::ContainerStopFailed;
        }
    }

    if let Err(e) = proxy.delete(id).await {
        tracing::warn!(%endpoint, %id, %e, "DELETE container failed");
        return SchedulingSignal::ContainerDeleteFailed;
    }

    SchedulingSignal::UnscheduleSuccessful
}

#[cfg(test)]
#[path = "transformer_tests.rs"]
mod tests;
