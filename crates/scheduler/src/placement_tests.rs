// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::config;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sv_core::HostResources;

fn agent(cpus: f64, memory: u64, volumes: &[&str]) -> AgentState {
    AgentState {
        dirty: false,
        host_resources: HostResources {
            cpus,
            memory,
            volumes: volumes.iter().map(|v| v.to_string()).collect(),
        },
        container_instances: Default::default(),
    }
}

fn free(cpus: f64, memory: i64, volumes: &[&str]) -> FreeResources {
    FreeResources { cpus, memory, volumes: volumes.iter().map(|v| v.to_string()).collect() }
}

fn states(entries: Vec<(&str, AgentState)>) -> BTreeMap<Endpoint, AgentState> {
    entries.into_iter().map(|(name, state)| (Endpoint::from(name), state)).collect()
}

fn cid(s: &str) -> ContainerId {
    ContainerId::from(s)
}

#[yare::parameterized(
    exact_fit = { 2.0, 300, &["/a", "/b", "/c"] },
    extra_memory = { 2.0, 400, &["/a", "/b"] },
    extra_cpu = { 3.0, 300, &["/a", "/b"] },
    plenty = { 4.0, 300, &["/a", "/b", "/c"] },
)]
fn matches_accepts(cpus: f64, memory: i64, volumes: &[&str]) {
    let cfg = config(2.0, 300, &["/a", "/b"]);
    assert!(matches(&cfg, &free(cpus, memory, volumes)));
}

#[yare::parameterized(
    too_little_cpu = { 1.0, 300, &["/a", "/b"] },
    too_little_memory = { 2.0, 200, &["/a", "/b"] },
    missing_volume_b = { 100.0, 1100, &["/a", "/c"] },
    only_b = { 2.0, 300, &["/b"] },
    nothing = { 0.0, 0, &[] },
)]
fn matches_rejects(cpus: f64, memory: i64, volumes: &[&str]) {
    let cfg = config(2.0, 300, &["/a", "/b"]);
    assert!(!matches(&cfg, &free(cpus, memory, volumes)));
}

#[test]
fn filter_returns_matching_agents_sorted() {
    let free_by_agent: BTreeMap<Endpoint, FreeResources> = [
        ("state1", free(3.0, 700, &["/a", "/b", "/c"])),
        ("state2", free(11.0, 200, &["/a", "/c"])),
        ("state3", free(1.0, 1, &[])),
        ("state4", free(3.0, 700, &["/b"])),
    ]
    .into_iter()
    .map(|(name, f)| (Endpoint::from(name), f))
    .collect();

    // Infeasible config matches nothing.
    assert!(filter(&config(12.0, 1100, &[]), &free_by_agent).is_empty());

    // Exactly state1 satisfies cpu+mem+volumes.
    let candidates = filter(&config(2.0, 300, &["/a", "/b"]), &free_by_agent);
    assert_eq!(candidates, vec![Endpoint::from("state1")]);

    // A trivial config matches everyone, in sorted order.
    let candidates = filter(&config(1.0, 1, &[]), &free_by_agent);
    assert_eq!(candidates.len(), free_by_agent.len());
    let mut sorted = candidates.clone();
    sorted.sort();
    assert_eq!(candidates, sorted);
}

#[test]
fn random_fit_respects_resources_and_reports_residue() {
    let configs: BTreeMap<ContainerId, ContainerConfig> = [
        (cid("cfg1"), config(2.0, 300, &["/a", "/b"])),
        (cid("cfg2"), config(3.0, 300, &["/c", "/b"])),
        (cid("cfg3"), config(4.0, 1, &[])),
        (cid("cfg4"), config(4.0, 1, &[])),
        (cid("cfg5"), config(4.0, 1, &[])),
        (cid("cfg6"), config(12.0, 1100, &[])),
    ]
    .into_iter()
    .collect();

    let states = states(vec![
        ("state1", agent(3.0, 700, &["/a", "/b", "/c"])),
        ("state2", agent(11.0, 200, &["/a", "/c"])),
        ("state3", agent(1.0, 1, &[])),
        ("state4", agent(3.0, 700, &["/b"])),
    ]);

    let mut rng = StdRng::seed_from_u64(7);
    let placement = random_fit(&configs, &states, &BTreeMap::new(), &mut rng);

    // cfg1 exhausts state1's CPU, so cfg2 no longer fits anywhere;
    // state2 has CPU for two of cfg3/cfg4/cfg5; cfg6 fits nowhere.
    let state1 = &placement.mapping[&Endpoint::from("state1")];
    assert_eq!(state1.len(), 1);
    assert!(state1.contains_key("cfg1"));

    let state2 = &placement.mapping[&Endpoint::from("state2")];
    assert_eq!(state2.len(), 2);

    assert!(!placement.mapping.contains_key(&Endpoint::from("state3")));
    assert_eq!(placement.unscheduled.len(), 3);
    assert!(placement.unscheduled.contains_key("cfg6"));
}

#[test]
fn random_fit_counts_pending_tasks_against_free() {
    let mut configs = BTreeMap::new();
    let mut pending = BTreeMap::new();
    for i in 0..11 {
        configs.insert(cid(&format!("cfg{:02}", i)), config(0.5, 100, &["/a", "/b"]));
        let id = cid(&format!("pending{:02}", i));
        pending.insert(
            id.clone(),
            TaskSpec {
                endpoint: Some(Endpoint::from("state1")),
                job_name: "pending".to_string(),
                container_id: id,
                config: config(0.5, 100, &[]),
            },
        );
    }

    let one_agent = states(vec![("state1", agent(5.5, 1100, &["/a", "/b", "/c"]))]);
    let mut rng = StdRng::seed_from_u64(7);
    let placement = random_fit(&configs, &one_agent, &pending, &mut rng);

    // The pending tasks already consume everything state1 has.
    assert!(placement.mapping.is_empty());
    assert_eq!(placement.unscheduled.len(), configs.len());

    // A second empty agent absorbs all of them.
    let two_agents = states(vec![
        ("state1", agent(5.5, 1100, &["/a", "/b", "/c"])),
        ("state2", agent(5.5, 1100, &["/a", "/b", "/c"])),
    ]);
    let mut rng = StdRng::seed_from_u64(7);
    let placement = random_fit(&configs, &two_agents, &pending, &mut rng);
    assert!(placement.unscheduled.is_empty());
    assert_eq!(placement.mapping[&Endpoint::from("state2")].len(), configs.len());
}

#[test]
fn random_fit_with_no_agents_returns_everything_unscheduled() {
    let empty = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(7);

    let placement = random_fit(&BTreeMap::new(), &empty, &BTreeMap::new(), &mut rng);
    assert!(placement.mapping.is_empty());
    assert!(placement.unscheduled.is_empty());

    let configs: BTreeMap<ContainerId, ContainerConfig> = [
        (cid("random1"), config(12.0, 100, &["/a"])),
        (cid("random2"), config(12.0, 100, &[])),
    ]
    .into_iter()
    .collect();
    let placement = random_fit(&configs, &empty, &BTreeMap::new(), &mut rng);
    assert!(placement.mapping.is_empty());
    assert_eq!(placement.unscheduled, configs);
}

#[test]
fn random_fit_subtracts_known_containers() {
    let mut state = agent(4.0, 1000, &[]);
    let instance = sv_core::ContainerInstance {
        id: cid("running-0000000-0"),
        status: sv_core::ContainerStatus::Running,
        config: config(3.0, 800, &[]),
    };
    state.container_instances.insert(instance.id.clone(), instance);
    let states = states(vec![("state1", state)]);

    let configs: BTreeMap<ContainerId, ContainerConfig> =
        [(cid("cfg1"), config(2.0, 100, &[]))].into_iter().collect();
    let mut rng = StdRng::seed_from_u64(7);
    let placement = random_fit(&configs, &states, &BTreeMap::new(), &mut rng);

    // Only 1 cpu is left after the running container.
    assert!(placement.mapping.is_empty());
    assert_eq!(placement.unscheduled.len(), 1);
}

#[test]
fn random_fit_is_deterministic_for_a_pinned_seed() {
    let configs: BTreeMap<ContainerId, ContainerConfig> = (0..8)
        .map(|i| (cid(&format!("cfg{}", i)), config(1.0, 50, &[])))
        .collect();
    let states = states(vec![
        ("state1", agent(8.0, 800, &[])),
        ("state2", agent(8.0, 800, &[])),
        ("state3", agent(8.0, 800, &[])),
    ]);

    let a = random_fit(&configs, &states, &BTreeMap::new(), &mut StdRng::seed_from_u64(42));
    let b = random_fit(&configs, &states, &BTreeMap::new(), &mut StdRng::seed_from_u64(42));
    assert_eq!(a, b);
}

fn arb_config() -> impl Strategy<Value = ContainerConfig> {
    ((1u32..8), (1u64..512)).prop_map(|(cpus, memory)| config(cpus as f64 / 2.0, memory, &[]))
}

proptest! {
    // If any agent matches and nothing is pending, random_fit always
    // places the config.
    #[test]
    fn match_implies_placement(cfg in arb_config(), seed in any::<u64>()) {
        let states = states(vec![
            ("state1", agent(2.0, 256, &[])),
            ("state2", agent(4.0, 512, &[])),
        ]);
        let free_by_agent = effective_free(&states, &BTreeMap::new());

        let configs: BTreeMap<ContainerId, ContainerConfig> =
            [(cid("cfg"), cfg.clone())].into_iter().collect();
        let placement =
            random_fit(&configs, &states, &BTreeMap::new(), &mut StdRng::seed_from_u64(seed));

        if filter(&cfg, &free_by_agent).is_empty() {
            prop_assert_eq!(placement.unscheduled.len(), 1);
        } else {
            prop_assert!(placement.unscheduled.is_empty());
            prop_assert_eq!(placement.mapping.values().map(|m| m.len()).sum::<usize>(), 1);
        }
    }

    // Placement never overcommits an agent's effective free resources.
    #[test]
    fn placements_never_overcommit(
        cfgs in proptest::collection::vec(arb_config(), 0..16),
        seed in any::<u64>(),
    ) {
        let states = states(vec![
            ("state1", agent(4.0, 512, &[])),
            ("state2", agent(8.0, 1024, &[])),
        ]);
        let configs: BTreeMap<ContainerId, ContainerConfig> = cfgs
            .into_iter()
            .enumerate()
            .map(|(i, cfg)| (cid(&format!("cfg{:02}", i)), cfg))
            .collect();

        let placement =
            random_fit(&configs, &states, &BTreeMap::new(), &mut StdRng::seed_from_u64(seed));
        let free_by_agent = effective_free(&states, &BTreeMap::new());

        for (endpoint, tasks) in &placement.mapping {
            let cpus: f64 = tasks.values().map(|c| c.resources.cpus).sum();
            let memory: i64 = tasks.values().map(|c| c.resources.memory as i64).sum();
            let free = &free_by_agent[endpoint];
            prop_assert!(cpus <= free.cpus + 1e-9);
            prop_assert!(memory <= free.memory);
        }
    }
}
