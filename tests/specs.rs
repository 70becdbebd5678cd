// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level specs: a scheduler driving real in-process agents
//! over the same HTTP surfaces the binaries use.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use sv_agent::api::{self as agent_api, ApiCtx};
use sv_agent::{InstanceRegistry, SupervisedRuntime};
use sv_core::metrics::{AgentCounters, SchedulerCounters};
use sv_core::{
    ContainerConfig, ContainerStatus, Endpoint, Grace, Job, RegistryState, Resources, Storage,
};
use sv_scheduler::listener::{self, ListenCtx};
use sv_scheduler::{Registry, Transformer, TransformerConfig};
use sv_wire::{SchedulerStatus, SuccessResponse};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

const WAIT: Duration = Duration::from_secs(10);

struct AgentUnderTest {
    endpoint: Endpoint,
    registry: Arc<InstanceRegistry>,
}

async fn spawn_agent(cpus: f64, memory: u64) -> AgentUnderTest {
    let counters = Arc::new(AgentCounters::default());
    let registry = Arc::new(InstanceRegistry::new(Arc::clone(&counters)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap().to_string());

    let ctx = Arc::new(ApiCtx {
        registry: Arc::clone(&registry),
        runtime: Arc::new(SupervisedRuntime::new()),
        resources: sv_core::HostResources { cpus, memory, volumes: BTreeSet::new() },
        counters,
    });
    tokio::spawn(agent_api::run(listener, ctx));

    AgentUnderTest { endpoint, registry }
}

struct SchedulerUnderTest {
    addr: String,
    registry: Registry,
    discovery_tx: watch::Sender<BTreeSet<Endpoint>>,
    _transformer: Transformer,
    _dir: TempDir,
}

async fn spawn_scheduler(agents: &[&AgentUnderTest]) -> SchedulerUnderTest {
    let dir = TempDir::new().unwrap();
    let (lost_tx, lost_rx) = mpsc::channel(16);
    let registry = Registry::open(dir.path().join("registry.json"), lost_rx).unwrap();
    let endpoints: BTreeSet<Endpoint> = agents.iter().map(|a| a.endpoint.clone()).collect();
    let (discovery_tx, discovery_rx) = watch::channel(endpoints);
    let counters = Arc::new(SchedulerCounters::default());

    let transformer = Transformer::spawn(
        discovery_rx,
        registry.clone(),
        lost_tx,
        Arc::clone(&counters),
        TransformerConfig {
            agent_poll_interval: Duration::from_millis(10),
            reconcile_interval: Duration::from_millis(100),
        },
        StdRng::seed_from_u64(7),
    );

    let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = http.local_addr().unwrap().to_string();
    let ctx = Arc::new(ListenCtx {
        registry: registry.clone(),
        transformer: transformer.handle(),
        counters,
    });
    tokio::spawn(listener::run(http, ctx));

    SchedulerUnderTest { addr, registry, discovery_tx, _transformer: transformer, _dir: dir }
}

fn job(name: &str, scale: u32) -> Job {
    Job {
        job_name: name.to_string(),
        container_config: ContainerConfig {
            resources: Resources { cpus: 1.0, memory: 128 },
            storage: Storage::default(),
            grace: Grace { startup: 2, shutdown: 2 },
        },
        scale,
    }
}

async fn wait_for_registry(
    registry: &Registry,
    predicate: impl Fn(&RegistryState) -> bool,
) -> bool {
    let rx = registry.subscribe();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if predicate(&rx.borrow()) {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn schedule_runs_containers_across_the_fleet() {
    let agent1 = spawn_agent(2.0, 512).await;
    let agent2 = spawn_agent(2.0, 512).await;
    let scheduler = spawn_scheduler(&[&agent1, &agent2]).await;

    let body = serde_json::to_string(&job("api", 3)).unwrap();
    let response =
        sv_wire::request(&scheduler.addr, "POST", "/schedule", Some(&body)).await.unwrap();
    assert_eq!(response.status, 200);
    let success: SuccessResponse = serde_json::from_str(&response.body).unwrap();
    assert_eq!(success.message, "api successfully scheduled");

    assert!(
        wait_for_registry(&scheduler.registry, |s| {
            s.pending_schedule.is_empty() && s.scheduled.len() == 3
        })
        .await
    );

    // 3 containers of 1 cpu across two 2-cpu agents: both hosts used.
    let running = |registry: &InstanceRegistry| {
        registry
            .list()
            .values()
            .filter(|i| i.status == ContainerStatus::Running)
            .count()
    };
    let deadline = tokio::time::Instant::now() + WAIT;
    while running(&agent1.registry) + running(&agent2.registry) < 3 {
        assert!(tokio::time::Instant::now() < deadline, "containers never all ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(running(&agent1.registry) >= 1);
    assert!(running(&agent2.registry) >= 1);

    // Introspection agrees.
    let response = sv_wire::request(&scheduler.addr, "GET", "/", None).await.unwrap();
    let status: SchedulerStatus = serde_json::from_str(&response.body).unwrap();
    assert_eq!(status.registry.scheduled.len(), 3);
    assert_eq!(status.agents.len(), 2);
    assert!(status.counters.containers_placed >= 3);
}

#[tokio::test]
async fn unschedule_drives_the_fleet_back_to_empty() {
    let agent = spawn_agent(4.0, 1024).await;
    let scheduler = spawn_scheduler(&[&agent]).await;

    let body = serde_json::to_string(&job("worker", 2)).unwrap();
    sv_wire::request(&scheduler.addr, "POST", "/schedule", Some(&body)).await.unwrap();
    assert!(wait_for_registry(&scheduler.registry, |s| s.scheduled.len() == 2).await);

    let response =
        sv_wire::request(&scheduler.addr, "POST", "/unschedule", Some(&body)).await.unwrap();
    assert_eq!(response.status, 200);

    assert!(wait_for_registry(&scheduler.registry, |s| s.is_empty()).await);
    let deadline = tokio::time::Instant::now() + WAIT;
    while !agent.registry.list().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "containers never deleted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn lost_agents_get_their_containers_replaced() {
    let agent1 = spawn_agent(4.0, 1024).await;
    let agent2 = spawn_agent(4.0, 1024).await;
    let scheduler = spawn_scheduler(&[&agent1, &agent2]).await;

    let j = job("api", 1);
    let id = j.container_ids().remove(0);
    scheduler.registry.schedule(j).await.unwrap();
    assert!(wait_for_registry(&scheduler.registry, |s| s.scheduled.len() == 1).await);

    let survivor = if agent1.registry.get(&id).is_some() { &agent2 } else { &agent1 };

    // The other agent vanishes from discovery. (Its task keeps serving
    // whatever connections it has; the scheduler simply stops caring.)
    scheduler
        .discovery_tx
        .send([survivor.endpoint.clone()].into_iter().collect())
        .unwrap();

    assert!(
        wait_for_registry(&scheduler.registry, |s| {
            s.scheduled
                .get(&id)
                .is_some_and(|spec| spec.endpoint.as_ref() == Some(&survivor.endpoint))
        })
        .await
    );
    let deadline = tokio::time::Instant::now() + WAIT;
    while survivor.registry.get(&id).is_none() {
        assert!(tokio::time::Instant::now() < deadline, "container never replaced");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
