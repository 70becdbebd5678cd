// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed client for the agent HTTP surface.
//!
//! One proxy per agent endpoint. Transport failures and HTTP statuses
//! are folded into [`AgentError`] so callers never see raw HTTP.

use sv_core::{ContainerConfig, ContainerId, ContainerInstance, ContainersSnapshot, Endpoint, HostResources};
use sv_wire::{AgentEvent, HttpError, HttpResponse, HttpStream};
use thiserror::Error;

/// Failures of a single agent operation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AgentError {
    fn from_status(response: &HttpResponse) -> Option<Self> {
        let body = || response.body.trim().to_string();
        match response.status {
            200..=299 => None,
            404 => Some(AgentError::NotFound),
            409 => Some(AgentError::Conflict(body())),
            400 => Some(AgentError::BadRequest(body())),
            503 => Some(AgentError::Unavailable(body())),
            status => Some(AgentError::Network(format!("HTTP {}: {}", status, response.body.trim()))),
        }
    }
}

impl From<HttpError> for AgentError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Connect { .. } | HttpError::Timeout => AgentError::Unavailable(e.to_string()),
            other => AgentError::Network(other.to_string()),
        }
    }
}

/// Client handle for one agent.
#[derive(Debug, Clone)]
pub struct AgentProxy {
    endpoint: Endpoint,
}

impl AgentProxy {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Create a container. Not idempotent: a second PUT for a live ID
    /// answers `Conflict`.
    pub async fn put(&self, id: &ContainerId, config: &ContainerConfig) -> Result<(), AgentError> {
        let body = serde_json::to_string(config)
            .map_err(|e| AgentError::BadRequest(format!("unencodable config: {}", e)))?;
        let path = format!("/containers/{}", id);
        let response =
            sv_wire::request(self.endpoint.as_str(), "PUT", &path, Some(&body)).await?;
        match AgentError::from_status(&response) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    pub async fn get(&self, id: &ContainerId) -> Result<ContainerInstance, AgentError> {
        let path = format!("/containers/{}", id);
        let response = sv_wire::request(self.endpoint.as_str(), "GET", &path, None).await?;
        if let Some(e) = AgentError::from_status(&response) {
            return Err(e);
        }
        serde_json::from_str(&response.body)
            .map_err(|e| AgentError::Network(format!("undecodable instance: {}", e)))
    }

    /// Idempotent: deleting an already-deleted container succeeds.
    pub async fn delete(&self, id: &ContainerId) -> Result<(), AgentError> {
        let path = format!("/containers/{}", id);
        let response = sv_wire::request(self.endpoint.as_str(), "DELETE", &path, None).await?;
        match AgentError::from_status(&response) {
            None | Some(AgentError::NotFound) => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Idempotent: stopping a terminal container succeeds.
    pub async fn stop(&self, id: &ContainerId) -> Result<(), AgentError> {
        let path = format!("/containers/{}/stop", id);
        let response = sv_wire::request(self.endpoint.as_str(), "POST", &path, Some("{}")).await?;
        match AgentError::from_status(&response) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    pub async fn containers(&self) -> Result<ContainersSnapshot, AgentError> {
        let response = sv_wire::request(self.endpoint.as_str(), "GET", "/containers", None).await?;
        if let Some(e) = AgentError::from_status(&response) {
            return Err(e);
        }
        serde_json::from_str(&response.body)
            .map_err(|e| AgentError::Network(format!("undecodable snapshot: {}", e)))
    }

    pub async fn resources(&self) -> Result<HostResources, AgentError> {
        let response = sv_wire::request(self.endpoint.as_str(), "GET", "/resources", None).await?;
        if let Some(e) = AgentError::from_status(&response) {
            return Err(e);
        }
        serde_json::from_str(&response.body)
            .map_err(|e| AgentError::Network(format!("undecodable resources: {}", e)))
    }

    /// Open the agent's event stream.
    pub async fn events(&self) -> Result<EventStream, AgentError> {
        let stream = sv_wire::open_stream(self.endpoint.as_str(), "/events").await?;
        Ok(EventStream { inner: stream })
    }
}

/// Parsed `/events` stream; `None` once the agent closes it.
pub struct EventStream {
    inner: HttpStream,
}

impl EventStream {
    pub async fn next(&mut self) -> Result<Option<AgentEvent>, AgentError> {
        loop {
            let line = match self.inner.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) => return Err(AgentError::Network(e.to_string())),
            };
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|e| AgentError::Network(format!("undecodable event: {}", e)));
        }
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
