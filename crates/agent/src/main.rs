// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent daemon entry point.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use sv_agent::api::{self, ApiCtx};
use sv_agent::{log_router, resources};
use sv_agent::{InstanceRegistry, SupervisedRuntime};
use sv_core::metrics::AgentCounters;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sva", about = "Stevedore agent")]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:3333")]
    addr: String,

    /// Address for log datagrams.
    #[arg(long = "log-addr", default_value = "127.0.0.1:3334")]
    log_addr: String,

    /// Available CPU resources (-1 to use all CPUs).
    #[arg(long, default_value_t = -1)]
    cpu: i64,

    /// Available memory in MB (-1 to use all).
    #[arg(long, default_value_t = -1)]
    mem: i64,

    /// Available volume mount point, repeatable.
    #[arg(short = 'v', value_name = "PATH")]
    volumes: Vec<String>,
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
    let resources = resources::detect(args.cpu, args.mem, args.volumes)?;
    info!(
        cpus = resources.cpus,
        memory_mb = resources.memory,
        volumes = resources.volumes.len(),
        "host resources"
    );

    let counters = Arc::new(AgentCounters::default());
    let registry = Arc::new(InstanceRegistry::new(Arc::clone(&counters)));

    let log_socket = UdpSocket::bind(&args.log_addr).await?;
    info!(log_addr = %args.log_addr, "receiving log datagrams");
    tokio::spawn(log_router::run(
        log_socket,
        Arc::clone(&registry),
        Arc::clone(&counters),
    ));

    let listener = TcpListener::bind(&args.addr).await?;
    info!(addr = %args.addr, "listening");

    let ctx = Arc::new(ApiCtx {
        registry,
        runtime: Arc::new(SupervisedRuntime::new()),
        resources,
        counters,
    });
    tokio::select! {
        _ = api::run(listener, ctx) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    Ok(())
}
