// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::container::{ContainerConfig, Resources};
use crate::task::Endpoint;
use proptest::prelude::*;

fn job(name: &str, scale: u32) -> Job {
    Job {
        job_name: name.to_string(),
        container_config: ContainerConfig {
            resources: Resources { cpus: 1.0, memory: 128 },
            ..Default::default()
        },
        scale,
    }
}

fn endpoint() -> Endpoint {
    Endpoint::from("127.0.0.1:3333")
}

#[test]
fn schedule_lands_in_pending_unbound() {
    let mut state = RegistryState::default();
    state.schedule(&job("api", 3)).unwrap();

    assert_eq!(state.pending_schedule.len(), 3);
    assert!(state.scheduled.is_empty());
    assert!(state.pending_schedule.values().all(|s| s.endpoint.is_none()));
}

#[test]
fn schedule_rejects_known_ids() {
    let mut state = RegistryState::default();
    state.schedule(&job("api", 2)).unwrap();

    let err = state.schedule(&job("api", 2)).unwrap_err();
    assert!(matches!(err, StateError::AlreadyScheduled { .. }));
    // Nothing was partially added
    assert_eq!(state.pending_schedule.len(), 2);
}

#[test]
fn unschedule_requires_scheduled_containers() {
    let mut state = RegistryState::default();
    state.schedule(&job("api", 1)).unwrap();

    // Still pending-schedule, not scheduled
    assert_eq!(
        state.unschedule(&job("api", 1)),
        Err(StateError::NotScheduled("api".to_string()))
    );
}

#[test]
fn signal_table_happy_path() {
    let mut state = RegistryState::default();
    let j = job("api", 1);
    let id = j.container_ids().remove(0);

    state.schedule(&j).unwrap();
    let outcome = state.apply_signal(
        &id,
        &SchedulingSignal::ScheduleSuccessful { endpoint: endpoint() },
    );
    assert_eq!(outcome, SignalOutcome::Applied);
    assert!(state.pending_schedule.is_empty());
    assert_eq!(state.scheduled[&id].endpoint, Some(endpoint()));

    state.unschedule(&j).unwrap();
    assert!(state.scheduled.is_empty());
    assert_eq!(state.pending_unschedule.len(), 1);

    state.apply_signal(&id, &SchedulingSignal::UnscheduleSuccessful);
    assert!(state.is_empty());
}

#[test]
fn failure_signals_keep_bucket() {
    let mut state = RegistryState::default();
    let j = job("api", 1);
    let id = j.container_ids().remove(0);
    state.schedule(&j).unwrap();

    state.apply_signal(&id, &SchedulingSignal::ContainerPutFailed);
    assert!(state.pending_schedule.contains_key(&id));

    state.apply_signal(&id, &SchedulingSignal::ContainerStartFailed);
    assert!(state.pending_schedule.contains_key(&id));
}

#[test]
fn container_lost_restores_pending_and_clears_binding() {
    let mut state = RegistryState::default();
    let j = job("api", 1);
    let id = j.container_ids().remove(0);
    state.schedule(&j).unwrap();
    state.apply_signal(
        &id,
        &SchedulingSignal::ScheduleSuccessful { endpoint: endpoint() },
    );

    state.apply_signal(&id, &SchedulingSignal::ContainerLost);
    assert!(state.scheduled.is_empty());
    let spec = &state.pending_schedule[&id];
    assert_eq!(spec.endpoint, None);
}

#[test]
fn container_lost_completes_pending_unschedule() {
    let mut state = RegistryState::default();
    let j = job("api", 1);
    let id = j.container_ids().remove(0);
    state.schedule(&j).unwrap();
    state.apply_signal(
        &id,
        &SchedulingSignal::ScheduleSuccessful { endpoint: endpoint() },
    );
    state.unschedule(&j).unwrap();

    state.apply_signal(&id, &SchedulingSignal::ContainerLost);
    assert!(state.is_empty());
}

#[test]
fn unknown_ids_are_ignored() {
    let mut state = RegistryState::default();
    let outcome = state.apply_signal(
        &ContainerId::from("ghost-0000000-0"),
        &SchedulingSignal::UnscheduleSuccessful,
    );
    assert_eq!(outcome, SignalOutcome::Ignored);
}

#[test]
fn schedule_unschedule_roundtrip_returns_to_initial() {
    let mut state = RegistryState::default();
    let j = job("api", 2);
    state.schedule(&j).unwrap();
    for id in j.container_ids() {
        state.apply_signal(
            &id,
            &SchedulingSignal::ScheduleSuccessful { endpoint: endpoint() },
        );
    }
    state.unschedule(&j).unwrap();
    for id in j.container_ids() {
        state.apply_signal(&id, &SchedulingSignal::UnscheduleSuccessful);
    }
    assert_eq!(state, RegistryState::default());
}

fn arb_signal() -> impl Strategy<Value = SchedulingSignal> {
    prop_oneof![
        Just(SchedulingSignal::ScheduleSuccessful { endpoint: endpoint() }),
        Just(SchedulingSignal::UnscheduleSuccessful),
        Just(SchedulingSignal::ContainerPutFailed),
        Just(SchedulingSignal::ContainerStartFailed),
        Just(SchedulingSignal::ContainerStopFailed),
        Just(SchedulingSignal::ContainerDeleteFailed),
        Just(SchedulingSignal::AgentUnavailable),
        Just(SchedulingSignal::ContainerLost),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Schedule(u8),
    Unschedule(u8),
    Signal(u8, u8, SchedulingSignal),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Schedule),
        (0u8..4).prop_map(Op::Unschedule),
        ((0u8..4), (0u8..4), arb_signal()).prop_map(|(j, i, s)| Op::Signal(j, i, s)),
    ]
}

proptest! {
    // After any finite operation sequence, no container ID appears in
    // more than one bucket.
    #[test]
    fn buckets_stay_disjoint(ops in proptest::collection::vec(arb_op(), 0..64)) {
        let jobs: Vec<Job> = (0..4).map(|n| job(&format!("job{}", n), 3)).collect();
        let mut state = RegistryState::default();

        for op in ops {
            match op {
                Op::Schedule(j) => {
                    let _ = state.schedule(&jobs[j as usize]);
                }
                Op::Unschedule(j) => {
                    let _ = state.unschedule(&jobs[j as usize]);
                }
                Op::Signal(j, i, signal) => {
                    let ids = jobs[j as usize].container_ids();
                    let id = &ids[(i as usize) % ids.len()];
                    state.apply_signal(id, &signal);
                }
            }

            for id in state.pending_schedule.keys() {
                prop_assert!(!state.scheduled.contains_key(id));
                prop_assert!(!state.pending_unschedule.contains_key(id));
            }
            for id in state.scheduled.keys() {
                prop_assert!(!state.pending_unschedule.contains_key(id));
            }
        }
    }

    // Persistence is JSON; any state reachable through the reducer must
    // survive a serialize/deserialize round-trip bit-for-bit.
    #[test]
    fn state_roundtrips_through_json(ops in proptest::collection::vec(arb_op(), 0..32)) {
        let jobs: Vec<Job> = (0..4).map(|n| job(&format!("job{}", n), 2)).collect();
        let mut state = RegistryState::default();
        for op in ops {
            match op {
                Op::Schedule(j) => { let _ = state.schedule(&jobs[j as usize]); }
                Op::Unschedule(j) => { let _ = state.unschedule(&jobs[j as usize]); }
                Op::Signal(j, i, signal) => {
                    let ids = jobs[j as usize].container_ids();
                    state.apply_signal(&ids[(i as usize) % ids.len()], &signal);
                }
            }
        }

        let json = serde_json::to_string(&state).unwrap();
        let parsed: RegistryState = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, state);
    }
}
