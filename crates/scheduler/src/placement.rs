// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Placement: pure functions deciding which agent gets which container.
//!
//! Free resources are computed optimistically: declared host totals
//! minus every known container minus every pending task already bound
//! to the agent. The random choice is fed by an injected RNG so tests
//! are reproducible.

use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::BTreeMap;
use sv_core::{
    AgentState, ContainerConfig, ContainerId, Endpoint, FreeResources, TaskSpec,
};

/// True iff the agent's free resources satisfy the config: enough CPU,
/// enough memory, and every requested mount point present.
pub fn matches(config: &ContainerConfig, free: &FreeResources) -> bool {
    free.cpus >= config.resources.cpus
        && free.memory >= config.resources.memory as i64
        && config.storage.volumes.keys().all(|volume| free.volumes.contains(volume))
}

/// Endpoints whose free resources match, in sorted order so results are
/// reproducible modulo the random tie-break.
pub fn filter(
    config: &ContainerConfig,
    free_by_agent: &BTreeMap<Endpoint, FreeResources>,
) -> Vec<Endpoint> {
    free_by_agent
        .iter()
        .filter(|(_, free)| matches(config, free))
        .map(|(endpoint, _)| endpoint.clone())
        .collect()
}

/// Result of one placement round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
    pub mapping: BTreeMap<Endpoint, BTreeMap<ContainerId, ContainerConfig>>,
    pub unscheduled: BTreeMap<ContainerId, ContainerConfig>,
}

/// Each agent's effective free resources: declared totals minus known
/// containers minus pending tasks bound to it.
pub fn effective_free(
    states: &BTreeMap<Endpoint, AgentState>,
    pending: &BTreeMap<ContainerId, TaskSpec>,
) -> BTreeMap<Endpoint, FreeResources> {
    let mut free_by_agent = BTreeMap::new();
    for (endpoint, state) in states {
        let mut free = state.host_resources.to_free();
        for instance in state.container_instances.values() {
            free.subtract(&instance.config.resources);
        }
        for spec in pending.values() {
            if spec.endpoint.as_ref() == Some(endpoint)
                && !state.container_instances.contains_key(&spec.container_id)
            {
                free.subtract(&spec.config.resources);
            }
        }
        free_by_agent.insert(endpoint.clone(), free);
    }
    free_by_agent
}

/// Assign each config to a uniformly random matching agent, subtracting
/// as it goes; configs with no candidate land in `unscheduled`.
pub fn random_fit<R: Rng>(
    configs: &BTreeMap<ContainerId, ContainerConfig>,
    states: &BTreeMap<Endpoint, AgentState>,
    pending: &BTreeMap<ContainerId, TaskSpec>,
    rng: &mut R,
) -> Placement {
    let mut free_by_agent = effective_free(states, pending);
    let mut placement = Placement::default();

    for (id, config) in configs {
        let candidates = filter(config, &free_by_agent);
        match candidates.choose(rng) {
            Some(endpoint) => {
                if let Some(free) = free_by_agent.get_mut(endpoint) {
                    free.subtract(&config.resources);
                }
                placement
                    .mapping
                    .entry(endpoint.clone())
                    .or_default()
                    .insert(id.clone(), config.clone());
            }
            None => {
                placement.unscheduled.insert(id.clone(), config.clone());
            }
        }
    }

    placement
}

#[cfg(test)]
#[path = "placement_tests.rs"]
mod tests;
