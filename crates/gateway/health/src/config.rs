use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How upstreams are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMethod {
    /// `GET /health` for HTTP transports, TCP handshake for the rest.
    HttpGet,
    /// Plain TCP handshake for every target.
    TcpConnect,
}

/// Supervisor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between probe rounds.
    pub interval: Duration,

    /// Per-probe timeout.
    pub timeout: Duration,

    /// Maximum probes in flight globally.
    pub concurrency_limit: usize,

    /// Consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before marking healthy again.
    pub healthy_threshold: u32,

    /// Attempts for writing health state back to the store.
    pub writeback_attempts: u32,

    /// Base backoff between writeback attempts, doubled per attempt.
    pub writeback_backoff: Duration,

    /// Probe strategy.
    pub probe_method: ProbeMethod,

    /// Disable TLS verification for probes. Off in production.
    pub danger_accept_invalid_certs: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            concurrency_limit: 16,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            writeback_attempts: 3,
            writeback_backoff: Duration::from_millis(100),
            probe_method: ProbeMethod::HttpGet,
            danger_accept_invalid_certs: false,
        }
    }
}
