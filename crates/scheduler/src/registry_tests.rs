// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{config, job};
use std::collections::BTreeSet;
use sv_core::Endpoint;
use tempfile::TempDir;

fn registry_path(dir: &TempDir) -> PathBuf {
    dir.path().join("registry.json")
}

fn open(dir: &TempDir) -> (Registry, mpsc::Sender<BTreeSet<ContainerId>>) {
    let (lost_tx, lost_rx) = mpsc::channel(4);
    let registry = Registry::open(registry_path(dir), lost_rx).unwrap();
    (registry, lost_tx)
}

#[tokio::test]
async fn missing_file_is_empty_registry() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    assert!(registry.dump_state().await.is_empty());
}

#[tokio::test]
async fn corrupt_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    fs::write(registry_path(&dir), b"{not json").unwrap();

    let (_lost_tx, lost_rx) = mpsc::channel(4);
    let err = Registry::open(registry_path(&dir), lost_rx).unwrap_err();
    assert!(matches!(err, RegistryError::Corrupt { .. }));
}

#[tokio::test]
async fn schedule_persists_before_returning() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    registry.schedule(job("api", 2, config(1.0, 128, &[]))).await.unwrap();

    // Reopen from disk; the pending entries must be there.
    let (reopened, _lost2) = open(&dir);
    let state = reopened.dump_state().await;
    assert_eq!(state.pending_schedule.len(), 2);
    assert!(state.scheduled.is_empty());
}

#[tokio::test]
async fn schedule_rejects_duplicates_and_invalid_jobs() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    let j = job("api", 1, config(1.0, 128, &[]));

    registry.schedule(j.clone()).await.unwrap();
    assert!(matches!(
        registry.schedule(j.clone()).await,
        Err(RegistryError::State(StateError::AlreadyScheduled { .. }))
    ));

    assert!(matches!(
        registry.schedule(job("api", 0, config(1.0, 128, &[]))).await,
        Err(RegistryError::InvalidJob(JobError::ZeroScale))
    ));
}

#[tokio::test]
async fn unschedule_requires_scheduled_instances() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    let j = job("api", 1, config(1.0, 128, &[]));
    registry.schedule(j.clone()).await.unwrap();

    assert!(matches!(
        registry.unschedule(j).await,
        Err(RegistryError::State(StateError::NotScheduled(_)))
    ));
}

#[tokio::test]
async fn signals_move_specs_between_buckets() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    let j = job("api", 1, config(1.0, 128, &[]));
    let id = j.container_ids().remove(0);
    let endpoint = Endpoint::from("127.0.0.1:3333");

    registry.schedule(j.clone()).await.unwrap();
    registry
        .signal(id.clone(), SchedulingSignal::ScheduleSuccessful { endpoint: endpoint.clone() })
        .await;

    let state = registry.dump_state().await;
    assert!(state.pending_schedule.is_empty());
    assert_eq!(state.scheduled[&id].endpoint, Some(endpoint));

    registry.unschedule(j).await.unwrap();
    registry.signal(id.clone(), SchedulingSignal::UnscheduleSuccessful).await;
    assert!(registry.dump_state().await.is_empty());
}

#[tokio::test]
async fn lost_sets_restore_pending_schedule() {
    let dir = TempDir::new().unwrap();
    let (registry, lost_tx) = open(&dir);
    let j = job("api", 2, config(1.0, 128, &[]));
    registry.schedule(j.clone()).await.unwrap();
    for id in j.container_ids() {
        registry
            .signal(id, SchedulingSignal::ScheduleSuccessful {
                endpoint: Endpoint::from("127.0.0.1:3333"),
            })
            .await;
    }

    let ids: BTreeSet<ContainerId> = j.container_ids().into_iter().collect();
    lost_tx.send(ids).await.unwrap();

    let mut rx = registry.subscribe();
    let ok = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if rx.borrow().scheduled.is_empty() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(ok.is_ok());

    let state = registry.dump_state().await;
    assert_eq!(state.pending_schedule.len(), 2);
    assert!(state.pending_schedule.values().all(|s| s.endpoint.is_none()));
}

#[tokio::test]
async fn subscription_coalesces_to_latest_state() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    let rx = registry.subscribe();

    // Burst of mutations while the observer is not reading.
    for n in 0..10 {
        registry.schedule(job(&format!("job{}", n), 1, config(0.1, 16, &[]))).await.unwrap();
    }
    let final_state = registry.dump_state().await;

    // A late observer sees exactly the latest state, not a backlog.
    assert_eq!(*rx.borrow(), final_state);
    assert_eq!(rx.borrow().pending_schedule.len(), 10);
}

#[tokio::test]
async fn observed_states_are_monotonic() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    let mut rx = registry.subscribe();

    let writer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for n in 0..25 {
                registry
                    .schedule(job(&format!("job{}", n), 1, config(0.1, 16, &[])))
                    .await
                    .unwrap();
            }
        })
    };

    // The slow consumer may skip intermediates but never goes backward
    // and always ends on the final state.
    let mut last_seen = 0;
    loop {
        let seen = rx.borrow_and_update().pending_schedule.len();
        assert!(seen >= last_seen, "observed {} after {}", seen, last_seen);
        last_seen = seen;
        if seen == 25 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        if rx.has_changed().is_err() {
            break;
        }
    }
    writer.await.unwrap();
    assert_eq!(last_seen, 25);
}

#[tokio::test]
async fn persisted_file_is_always_parseable() {
    let dir = TempDir::new().unwrap();
    let (registry, _lost) = open(&dir);
    registry.schedule(job("api", 1, config(1.0, 128, &[]))).await.unwrap();

    // No .tmp residue once schedule has returned, and the file parses.
    let bytes = fs::read(registry_path(&dir)).unwrap();
    let state: RegistryState = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(state.pending_schedule.len(), 1);
}
