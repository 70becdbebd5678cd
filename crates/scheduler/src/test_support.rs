// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fake agent for scheduler tests.
//!
//! Speaks the same HTTP surface as a real agent but keeps containers in
//! memory, with knobs for start behavior so tests can force slow starts
//! and failures.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use sv_core::{
    ContainerInstance, ContainerStatus, ContainersSnapshot, Endpoint, HostResources,
};
use sv_wire::{AgentEvent, HttpRequest};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct FakeAgentState {
    containers: ContainersSnapshot,
    resources: HostResources,
    /// When true (the default), PUT containers go straight to Running.
    auto_run: bool,
    /// When true (the default), stop moves a container to Finished.
    stop_finishes: bool,
    subscribers: Vec<mpsc::UnboundedSender<AgentEvent>>,
}

impl FakeAgentState {
    fn broadcast(&mut self) {
        let snapshot = self.containers.clone();
        self.subscribers
            .retain(|tx| tx.send(AgentEvent::Containers(snapshot.clone())).is_ok());
    }
}

pub(crate) struct FakeAgent {
    addr: String,
    state: Arc<Mutex<FakeAgentState>>,
    accept_task: JoinHandle<()>,
}

impl FakeAgent {
    pub async fn spawn(resources: HostResources) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::with_listener(listener, resources)
    }

    /// Bind a specific address; used to bring an agent "back" after
    /// shutdown on the same endpoint.
    pub async fn spawn_on(addr: &str, resources: HostResources) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::with_listener(listener, resources)
    }

    fn with_listener(listener: TcpListener, resources: HostResources) -> Self {
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(FakeAgentState {
            resources,
            auto_run: true,
            stop_finishes: true,
            ..Default::default()
        }));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let (read_half, write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    let Ok(request) = sv_wire::read_request(&mut reader).await else { return };
                    handle(request, state, write_half).await;
                });
            }
        });

        Self { addr, state, accept_task }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.addr.clone())
    }

    pub fn set_auto_run(&self, auto_run: bool) {
        self.state.lock().auto_run = auto_run;
    }

    pub fn set_stop_finishes(&self, stop_finishes: bool) {
        self.state.lock().stop_finishes = stop_finishes;
    }

    /// Force a container status, broadcasting the change like a real
    /// runtime transition would.
    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        let mut state = self.state.lock();
        if let Some(instance) = state.containers.get_mut(id) {
            instance.status = status;
        }
        state.broadcast();
    }

    pub fn containers(&self) -> ContainersSnapshot {
        self.state.lock().containers.clone()
    }

    /// Stop accepting connections and drop all event subscribers.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.state.lock().subscribers.clear();
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

enum Reply {
    Json(u16, String),
    Stream(mpsc::UnboundedReceiver<AgentEvent>),
}

async fn handle(
    request: HttpRequest,
    state: Arc<Mutex<FakeAgentState>>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
) {
    // Locks are taken and released inside route(); nothing holds the
    // state across an await.
    match route(&request, &state) {
        Reply::Json(status, body) => {
            let _ = sv_wire::write_response(&mut writer, status, &body).await;
        }
        Reply::Stream(mut rx) => {
            if sv_wire::write_stream_head(&mut writer).await.is_err() {
                return;
            }
            while let Some(event) = rx.recv().await {
                let Ok(line) = serde_json::to_string(&event) else { return };
                if sv_wire::write_stream_line(&mut writer, &line).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn route(request: &HttpRequest, state: &Mutex<FakeAgentState>) -> Reply {
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["events"]) => {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = state.lock();
            let _ = tx.send(AgentEvent::Resources(state.resources.clone()));
            let _ = tx.send(AgentEvent::Containers(state.containers.clone()));
            state.subscribers.push(tx);
            Reply::Stream(rx)
        }

        ("GET", ["resources"]) => {
            Reply::Json(200, serde_json::to_string(&state.lock().resources).unwrap())
        }

        ("GET", ["containers"]) => {
            Reply::Json(200, serde_json::to_string(&state.lock().containers).unwrap())
        }

        ("GET", ["containers", id]) => match state.lock().containers.get(*id) {
            Some(instance) => Reply::Json(200, serde_json::to_string(instance).unwrap()),
            None => Reply::Json(404, "{}".to_string()),
        },

        ("PUT", ["containers", id]) => {
            let Ok(config) = serde_json::from_str(&request.body) else {
                return Reply::Json(400, "{}".to_string());
            };
            let mut state = state.lock();
            // A live container conflicts; a terminal one is replaced.
            if state.containers.get(*id).is_some_and(|i| !i.status.is_terminal()) {
                return Reply::Json(409, "{}".to_string());
            }
            let status =
                if state.auto_run { ContainerStatus::Running } else { ContainerStatus::Created };
            let instance = ContainerInstance { id: (*id).into(), status, config };
            state.containers.insert(instance.id.clone(), instance);
            state.broadcast();
            Reply::Json(200, "{}".to_string())
        }

        ("POST", ["containers", id, "stop"]) => {
            let mut state = state.lock();
            let stop_finishes = state.stop_finishes;
            match state.containers.get_mut(*id) {
                None => Reply::Json(404, "{}".to_string()),
                Some(instance) => {
                    if !instance.status.is_terminal() && stop_finishes {
                        instance.status = ContainerStatus::Finished;
                        state.broadcast();
                    }
                    Reply::Json(200, "{}".to_string())
                }
            }
        }

        ("DELETE", ["containers", id]) => {
            let mut state = state.lock();
            match state.containers.get(*id) {
                Some(instance) if !instance.status.is_terminal() => {
                    Reply::Json(409, "{}".to_string())
                }
                _ => {
                    state.containers.remove(*id);
                    state.broadcast();
                    Reply::Json(200, "{}".to_string())
                }
            }
        }

        _ => Reply::Json(404, "{}".to_string()),
    }
}

/// Poll until `condition` holds, failing the test after `timeout`.
pub(crate) async fn wait_until(
    timeout: std::time::Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}

pub(crate) fn host(cpus: f64, memory: u64, volumes: &[&str]) -> HostResources {
    HostResources {
        cpus,
        memory,
        volumes: volumes.iter().map(|v| v.to_string()).collect(),
    }
}

pub(crate) fn config(cpus: f64, memory: u64, volumes: &[&str]) -> sv_core::ContainerConfig {
    sv_core::ContainerConfig {
        resources: sv_core::Resources { cpus, memory },
        storage: sv_core::Storage {
            volumes: volumes.iter().map(|v| (v.to_string(), String::new())).collect(),
        },
        grace: sv_core::Grace { startup: 1, shutdown: 1 },
    }
}

pub(crate) fn job(name: &str, scale: u32, cfg: sv_core::ContainerConfig) -> sv_core::Job {
    sv_core::Job { job_name: name.to_string(), container_config: cfg, scale }
}
