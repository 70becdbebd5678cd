// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host resource detection for the agent's declared totals.

use std::collections::BTreeSet;
use sv_core::HostResources;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unable to read {path}: {source}")]
    Unreadable {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no MemTotal entry in /proc/meminfo")]
    NoMemTotal,
}

/// Resolve the agent's declared totals from flags; -1 means autodetect.
pub fn detect(cpu: i64, mem: i64, volumes: Vec<String>) -> Result<HostResources, DetectError> {
    let cpus = if cpu >= 0 { cpu as f64 } else { system_cpus() };
    let memory = if mem >= 0 { mem as u64 } else { system_memory_mb()? };
    let volumes: BTreeSet<String> = volumes.into_iter().collect();
    Ok(HostResources { cpus, memory, volumes })
}

fn system_cpus() -> f64 {
    std::thread::available_parallelism().map(|n| n.get() as f64).unwrap_or(1.0)
}

fn system_memory_mb() -> Result<u64, DetectError> {
    let content = std::fs::read_to_string("/proc/meminfo")
        .map_err(|source| DetectError::Unreadable { path: "/proc/meminfo", source })?;
    parse_meminfo_mb(&content).ok_or(DetectError::NoMemTotal)
}

/// Extract `MemTotal` (reported in kB) as MB.
fn parse_meminfo_mb(content: &str) -> Option<u64> {
    let line = content.lines().find(|line| line.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}
