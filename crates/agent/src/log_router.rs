// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log datagram router.
//!
//! Containers address their log lines as `container[<id>] <message>`;
//! the router delivers each line to the addressed container's watchers.
//! Exactly one counter moves per datagram outcome, and fanout never
//! blocks on a slow watcher.

use crate::registry::InstanceRegistry;
use std::sync::Arc;
use sv_core::metrics::AgentCounters;
use tokio::net::UdpSocket;

/// Receive datagrams until the socket dies.
pub async fn run(socket: UdpSocket, registry: Arc<InstanceRegistry>, counters: Arc<AgentCounters>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                tracing::warn!(%e, "log socket receive failed");
                continue;
            }
        };
        let datagram = String::from_utf8_lossy(&buf[..len]);
        route_line(datagram.trim_end_matches(['\r', '\n']), &registry, &counters);
    }
}

/// Route one line, moving exactly one of received's outcome counters.
pub fn route_line(line: &str, registry: &InstanceRegistry, counters: &AgentCounters) {
    counters.log_received_lines.inc();

    let Some((id, message)) = parse_line(line) else {
        counters.log_unparsable_lines.inc();
        tracing::debug!(line, "unparsable log line");
        return;
    };

    let Some(handle) = registry.get(&id.into()) else {
        counters.log_unroutable_lines.inc();
        tracing::debug!(id, "log line for unknown container");
        return;
    };

    handle.route_log(message);
}

/// Split `container[<id>] <message>`; anything else is unparsable.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("container[")?;
    let end = rest.find(']')?;
    let id = &rest[..end];
    let message = rest[end + 1..].strip_prefix(' ')?;
    Some((id, message))
}

#[cfg(test)]
#[path = "log_router_tests.rs"]
mod tests;
