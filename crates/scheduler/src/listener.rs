// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler HTTP API.
//!
//! Accepts connections and handles each in a spawned task so a slow
//! client never blocks the accept loop. Invalid bodies are rejected
//! before anything reaches the registry.

use crate::registry::Registry;
use crate::transformer::TransformerHandle;
use serde::Deserialize;
use std::sync::Arc;
use sv_core::metrics::SchedulerCounters;
use sv_core::Job;
use sv_wire::{ErrorResponse, HttpError, HttpRequest, SchedulerStatus, SuccessResponse};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Shared context for all request handlers.
pub struct ListenCtx {
    pub registry: Registry,
    pub transformer: TransformerHandle,
    pub counters: Arc<SchedulerCounters>,
}

/// Body of `POST /migrate`. Parsed for validity; the operation itself
/// is reserved.
#[derive(Debug, Deserialize)]
struct MigrateRequest {
    from: Job,
    to: Job,
}

/// Run the accept loop until the socket is closed.
pub async fn run(listener: TcpListener, ctx: Arc<ListenCtx>) {
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

async fn handle_connection(stream: TcpStream, ctx: &ListenCtx) -> Result<(), HttpError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let request = sv_wire::read_request(&mut reader).await?;

    info!(method = %request.method, path = %request.path, "request");
    let (status, body) = route(&request, ctx).await;
    sv_wire::write_response(&mut write_half, status, &body).await
}

async fn route(request: &HttpRequest, ctx: &ListenCtx) -> (u16, String) {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/schedule") => handle_schedule(request, ctx).await,
        ("POST", "/unschedule") => handle_unschedule(request, ctx).await,
        ("POST", "/migrate") => handle_migrate(request),
        ("GET", "/") => handle_status(ctx).await,
        _ => error_reply(404, "no such route"),
    }
}

async fn handle_schedule(request: &HttpRequest, ctx: &ListenCtx) -> (u16, String) {
    let job = match read_job(&request.body) {
        Ok(job) => job,
        Err(reply) => return reply,
    };
    ctx.counters.job_schedule_requests.inc();

    match ctx.registry.schedule(job.clone()).await {
        Ok(()) => success_reply(format!("{} successfully scheduled", job.job_name)),
        Err(e) => error_reply(400, e),
    }
}

async fn handle_unschedule(request: &HttpRequest, ctx: &ListenCtx) -> (u16, String) {
    let job = match read_job(&request.body) {
        Ok(job) => job,
        Err(reply) => return reply,
    };
    ctx.counters.job_unschedule_requests.inc();

    match ctx.registry.unschedule(job.clone()).await {
        Ok(()) => success_reply(format!("{} successfully unscheduled", job.job_name)),
        Err(e) => error_reply(400, e),
    }
}

fn handle_migrate(request: &HttpRequest) -> (u16, String) {
    let migrate: MigrateRequest = match serde_json::from_str(&request.body) {
        Ok(migrate) => migrate,
        Err(e) => return error_reply(400, format!("invalid migrate request: {}", e)),
    };
    for job in [&migrate.from, &migrate.to] {
        if let Err(e) = job.validate() {
            return error_reply(400, format!("invalid job: {}", e));
        }
    }
    error_reply(418, "not yet implemented")
}

async fn handle_status(ctx: &ListenCtx) -> (u16, String) {
    let status = SchedulerStatus {
        registry: ctx.registry.dump_state().await,
        agents: ctx.transformer.agent_states().await,
        counters: ctx.counters.snapshot(),
    };
    match serde_json::to_string(&status) {
        Ok(body) => (200, body),
        Err(e) => error_reply(500, e),
    }
}

fn read_job(body: &str) -> Result<Job, (u16, String)> {
    let job: Job =
        serde_json::from_str(body).map_err(|e| error_reply(400, format!("invalid job: {}", e)))?;
    job.validate().map_err(|e| error_reply(400, format!("invalid job: {}", e)))?;
    Ok(job)
}

fn success_reply(message: String) -> (u16, String) {
    let body = serde_json::to_string(&SuccessResponse { message }).unwrap_or_default();
    (200, body)
}

fn error_reply(status: u16, error: impl std::fmt::Display) -> (u16, String) {
    let body = serde_json::to_string(&ErrorResponse::new(status, error)).unwrap_or_default();
    (status, body)
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
