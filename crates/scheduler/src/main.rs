// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler daemon entry point.

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use sv_core::metrics::SchedulerCounters;
use sv_core::Endpoint;
use sv_scheduler::listener::{self, ListenCtx};
use sv_scheduler::{Registry, Transformer, TransformerConfig};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "svd", about = "Stevedore cluster scheduler")]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Agent endpoint, repeatable.
    #[arg(long = "agent", value_name = "ADDR")]
    agents: Vec<String>,

    /// How often to poll agents when starting or stopping containers
    /// (milliseconds).
    #[arg(long = "agent-poll-interval", value_name = "MS", default_value_t = 250)]
    agent_poll_interval_ms: u64,

    /// Where to persist registry state.
    #[arg(long = "registry-filename", default_value = "stevedore-registry.json")]
    registry_filename: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let endpoints: BTreeSet<Endpoint> =
        args.agents.iter().map(|a| Endpoint::from(a.as_str())).collect();
    for endpoint in &endpoints {
        info!(%endpoint, "agent");
    }

    let (lost_tx, lost_rx) = mpsc::channel(64);
    let registry = Registry::open(&args.registry_filename, lost_rx)?;

    let (_discovery_tx, discovery_rx) = watch::channel(endpoints);
    let counters = Arc::new(SchedulerCounters::default());
    let transformer = Transformer::spawn(
        discovery_rx,
        registry.clone(),
        lost_tx,
        Arc::clone(&counters),
        TransformerConfig {
            agent_poll_interval: Duration::from_millis(args.agent_poll_interval_ms),
            ..Default::default()
        },
        StdRng::from_os_rng(),
    );

    let http = TcpListener::bind(&args.listen).await?;
    info!(listen = %args.listen, "listening");

    let ctx = Arc::new(ListenCtx {
        registry: registry.clone(),
        transformer: transformer.handle(),
        counters,
    });
    tokio::select! {
        _ = listener::run(http, ctx) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    // Stops propagate bottom-up: transformer (and its state machines)
    // first, registry last.
    transformer.stop().await;
    registry.stop().await;
    Ok(())
}
