// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted desired-state registry.
//!
//! Single writer, many observers: mutations flow through one command
//! loop, are persisted with write-temp + rename before they are
//! acknowledged, and are broadcast on a `watch` channel. The watch edge
//! is the one-slot latest-value forwarder the transformer depends on:
//! it never blocks this loop, and a slow observer only ever misses
//! superseded intermediate states, never the final one.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use sv_core::{
    ContainerId, Job, JobError, RegistryState, SchedulingSignal, SignalOutcome, StateError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid job: {0}")]
    InvalidJob(#[from] JobError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("reading registry file {path} failed: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("persisting registry state failed: {0}")]
    Persist(#[source] std::io::Error),

    #[error("registry is stopped")]
    Stopped,
}

enum Command {
    Schedule(Job, oneshot::Sender<Result<(), RegistryError>>),
    Unschedule(Job, oneshot::Sender<Result<(), RegistryError>>),
    Signal(ContainerId, SchedulingSignal),
    DumpState(oneshot::Sender<RegistryState>),
    Stop(oneshot::Sender<()>),
}

/// Handle to the registry task. Cheap to clone; all clones feed the
/// same single-writer loop.
#[derive(Clone, Debug)]
pub struct Registry {
    tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<RegistryState>,
}

impl Registry {
    /// Load persisted state and start the registry loop.
    ///
    /// A missing file is an empty registry; a corrupt file is an error
    /// the caller treats as fatal. `lost_rx` merges lost-container sets
    /// from the transformer as `ContainerLost` signals.
    pub fn open(
        path: impl Into<PathBuf>,
        lost_rx: mpsc::Receiver<BTreeSet<ContainerId>>,
    ) -> Result<Self, RegistryError> {
        let path = path.into();
        let state = load(&path)?;
        tracing::info!(
            path = %path.display(),
            pending = state.pending_schedule.len(),
            scheduled = state.scheduled.len(),
            "registry opened"
        );

        let (state_tx, state_rx) = watch::channel(state.clone());
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(state, path, rx, lost_rx, state_tx));

        Ok(Self { tx, state_rx })
    }

    /// Add every instance of the job to pending-schedule. Persisted
    /// before this returns.
    pub async fn schedule(&self, job: Job) -> Result<(), RegistryError> {
        job.validate()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::Schedule(job, reply_tx)).await.map_err(|_| RegistryError::Stopped)?;
        reply_rx.await.map_err(|_| RegistryError::Stopped)?
    }

    /// Move the job's scheduled instances to pending-unschedule.
    pub async fn unschedule(&self, job: Job) -> Result<(), RegistryError> {
        job.validate()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Unschedule(job, reply_tx))
            .await
            .map_err(|_| RegistryError::Stopped)?;
        reply_rx.await.map_err(|_| RegistryError::Stopped)?
    }

    /// Report the outcome of one scheduling action.
    pub async fn signal(&self, id: ContainerId, signal: SchedulingSignal) {
        let _ = self.tx.send(Command::Signal(id, signal)).await;
    }

    /// Latest-value subscription. The current state is readable
    /// immediately via `borrow`; superseded intermediates coalesce.
    pub fn subscribe(&self) -> watch::Receiver<RegistryState> {
        self.state_rx.clone()
    }

    /// Introspection snapshot.
    pub async fn dump_state(&self) -> RegistryState {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::DumpState(reply_tx)).await.is_err() {
            return self.state_rx.borrow().clone();
        }
        reply_rx.await.unwrap_or_else(|_| self.state_rx.borrow().clone())
    }

    /// Stop the loop after draining in-flight commands.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Stop(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

async fn run(
    mut state: RegistryState,
    path: PathBuf,
    mut rx: mpsc::Receiver<Command>,
    mut lost_rx: mpsc::Receiver<BTreeSet<ContainerId>>,
    state_tx: watch::Sender<RegistryState>,
) {
    let mut lost_open = true;
    loop {
        tokio::select! {
            command = rx.recv() => match command {
                None => return,
                Some(Command::Schedule(job, reply)) => {
                    let result = mutate(&mut state, &path, &state_tx, |s| s.schedule(&job));
                    if result.is_ok() {
                        tracing::info!(job = %job.job_name, scale = job.scale, "job scheduled");
                    }
                    let _ = reply.send(result);
                }
                Some(Command::Unschedule(job, reply)) => {
                    let result = mutate(&mut state, &path, &state_tx, |s| s.unschedule(&job));
                    if result.is_ok() {
                        tracing::info!(job = %job.job_name, "job unscheduled");
                    }
                    let _ = reply.send(result);
                }
                Some(Command::Signal(id, signal)) => {
                    apply_signal(&mut state, &path, &state_tx, &id, &signal);
                }
                Some(Command::DumpState(reply)) => {
                    let _ = reply.send(state.clone());
                }
                Some(Command::Stop(reply)) => {
                    let _ = reply.send(());
                    return;
                }
            },
            lost = lost_rx.recv(), if lost_open => match lost {
                None => lost_open = false,
                Some(ids) => {
                    for id in ids {
                        apply_signal(&mut state, &path, &state_tx, &id, &SchedulingSignal::ContainerLost);
                    }
                }
            },
        }
    }
}

/// Apply a mutation to a scratch copy, persist it, then commit and
/// broadcast. A failed persist leaves the in-memory state untouched.
fn mutate(
    state: &mut RegistryState,
    path: &Path,
    state_tx: &watch::Sender<RegistryState>,
    f: impl FnOnce(&mut RegistryState) -> Result<(), StateError>,
) -> Result<(), RegistryError> {
    let mut next = state.clone();
    f(&mut next)?;
    persist(path, &next).map_err(RegistryError::Persist)?;
    *state = next;
    state_tx.send_replace(state.clone());
    Ok(())
}

fn apply_signal(
    state: &mut RegistryState,
    path: &Path,
    state_tx: &watch::Sender<RegistryState>,
    id: &ContainerId,
    signal: &SchedulingSignal,
) {
    let mut next = state.clone();
    match next.apply_signal(id, signal) {
        SignalOutcome::Ignored => {
            tracing::info!(%id, %signal, "signal for unknown container ignored");
        }
        SignalOutcome::Applied => {
            tracing::debug!(%id, %signal, "signal applied");
            // Failure signals leave the spec where it is; an identical
            // state is not re-broadcast, or every retry would trigger
            // the next one immediately. Retries ride the idle tick.
            if next == *state {
                return;
            }
            match persist(path, &next) {
                Ok(()) => {
                    *state = next;
                    state_tx.send_replace(state.clone());
                }
                Err(e) => {
                    tracing::error!(%id, %signal, %e, "persisting signal failed; state unchanged");
                }
            }
        }
    }
}

fn load(path: &Path) -> Result<RegistryState, RegistryError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(RegistryState::default());
        }
        Err(e) => return Err(RegistryError::Load { path: path.to_path_buf(), source: e }),
    };
    serde_json::from_slice(&bytes)
        .map_err(|source| RegistryError::Corrupt { path: path.to_path_buf(), source })
}

/// Write-temp + rename so a partial write is never observed.
fn persist(path: &Path, state: &RegistryState) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
