// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent HTTP surface, consumed by the scheduler's proxy.
//!
//! `/events` subscribes the connection to the instance registry and
//! streams one full snapshot per change; everything else is plain
//! request/response.

use crate::registry::{Deregistered, InstanceRegistry, RegisterError};
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use sv_core::metrics::AgentCounters;
use sv_core::{ContainerConfig, ContainerId, HostResources};
use sv_wire::{AgentEvent, AgentIntrospection, ErrorResponse, HttpError, HttpRequest};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Shared context for all request handlers.
pub struct ApiCtx {
    pub registry: Arc<InstanceRegistry>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub resources: HostResources,
    pub counters: Arc<AgentCounters>,
}

/// Run the accept loop until the socket is closed.
pub async fn run(listener: TcpListener, ctx: Arc<ApiCtx>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &ctx).await {
                        debug!(%e, "connection error");
                    }
                });
            }
            Err(e) => error!(%e, "accept error"),
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: &ApiCtx) -> Result<(), HttpError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let request = sv_wire::read_request(&mut reader).await?;
    debug!(method = %request.method, path = %request.path, "request");

    // /events upgrades the connection into a long-lived stream.
    if request.method == "GET" && request.path == "/events" {
        return stream_events(write_half, ctx).await;
    }

    let (status, body) = route(&request, ctx).await;
    sv_wire::write_response(&mut write_half, status, &body).await
}

async fn stream_events(mut writer: OwnedWriteHalf, ctx: &ApiCtx) -> Result<(), HttpError> {
    // A bounded subscription: if this peer stalls long enough to fill
    // the buffer, snapshots are dropped (and counted) rather than
    // blocking the registry.
    let (tx, mut rx) = mpsc::channel(32);
    ctx.registry.subscribe(tx);

    sv_wire::write_stream_head(&mut writer).await?;
    let resources = serde_json::to_string(&AgentEvent::Resources(ctx.resources.clone()))
        .map_err(|e| HttpError::Malformed(e.to_string()))?;
    sv_wire::write_stream_line(&mut writer, &resources).await?;

    while let Some(snapshot) = rx.recv().await {
        let line = serde_json::to_string(&AgentEvent::Containers(snapshot))
            .map_err(|e| HttpError::Malformed(e.to_string()))?;
        sv_wire::write_stream_line(&mut writer, &line).await?;
    }
    Ok(())
}

async fn route(request: &HttpRequest, ctx: &ApiCtx) -> (u16, String) {
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["resources"]) => json_reply(200, &ctx.resources),

        ("GET", ["metrics"]) => json_reply(
            200,
            &AgentIntrospection {
                resources: ctx.resources.clone(),
                containers: ctx.registry.list(),
                counters: ctx.counters.snapshot(),
            },
        ),

        ("GET", ["containers"]) => json_reply(200, &ctx.registry.list()),

        ("GET", ["containers", id]) => match ctx.registry.get(&(*id).into()) {
            Some(handle) => json_reply(200, &handle.instance()),
            None => error_reply(404, format!("no container {}", id)),
        },

        ("PUT", ["containers", id]) => handle_put(id, &request.body, ctx).await,

        ("POST", ["containers", id, "stop"]) => handle_stop(id, ctx).await,

        ("DELETE", ["containers", id]) => match ctx.registry.deregister(&(*id).into()) {
            Deregistered::Removed => (200, "{}".to_string()),
            Deregistered::NotFound => error_reply(404, format!("no container {}", id)),
            Deregistered::StillLive => {
                error_reply(409, format!("container {} is still live", id))
            }
        },

        _ => error_reply(404, "no such route"),
    }
}

async fn handle_put(id: &str, body: &str, ctx: &ApiCtx) -> (u16, String) {
    let config: ContainerConfig = match serde_json::from_str(body) {
        Ok(config) => config,
        Err(e) => return error_reply(400, format!("invalid container config: {}", e)),
    };

    // Placement should never send us a volume we don't offer, but a
    // second scheduler may have raced it here.
    for volume in config.storage.volumes.keys() {
        if !ctx.resources.volumes.contains(volume) {
            return error_reply(400, format!("volume {} not offered by this host", volume));
        }
    }

    let id = ContainerId::from(id);
    let handle = match ctx.registry.register(id.clone(), config.clone()) {
        Ok(handle) => handle,
        Err(RegisterError::Conflict(id)) => {
            return error_reply(409, format!("container {} already exists", id));
        }
    };

    // Launch in the background; the caller polls GET until the status
    // leaves Created.
    let registry = Arc::clone(&ctx.registry);
    let runtime = Arc::clone(&ctx.runtime);
    tokio::spawn(async move {
        if let Err(e) = runtime.start(&registry, &handle.id(), &config).await {
            tracing::warn!(id = %handle.id(), %e, "container launch failed");
            registry.advance_status(&handle.id(), sv_core::ContainerStatus::Failed);
        }
    });

    (200, "{}".to_string())
}

async fn handle_stop(id: &str, ctx: &ApiCtx) -> (u16, String) {
    let id = ContainerId::from(id);
    let Some(handle) = ctx.registry.get(&id) else {
        return error_reply(404, format!("no container {}", id));
    };

    // Idempotent: stopping a terminal container is a no-op success.
    if handle.status().is_terminal() {
        return (200, "{}".to_string());
    }

    match ctx.runtime.stop(&ctx.registry, &id).await {
        Ok(()) => (200, "{}".to_string()),
        Err(e) => error_reply(500, e),
    }
}

fn json_reply(status: u16, value: &impl serde::Serialize) -> (u16, String) {
    match serde_json::to_string(value) {
        Ok(body) => (status, body),
        Err(e) => error_reply(500, e),
    }
}

fn error_reply(status: u16, error: impl std::fmt::Display) -> (u16, String) {
    let body = serde_json::to_string(&ErrorResponse::new(status, error)).unwrap_or_default();
    (status, body)
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
