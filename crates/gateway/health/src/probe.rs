//! Probe execution against upstreams.

use std::time::Duration;

use async_trait::async_trait;
use gateway_types::{Entity, EntityType, Namespace, Registrable, Transport};
use tracing::debug;
use url::Url;

use crate::config::ProbeMethod;
use crate::error::{HealthError, HealthResult};

/// What the supervisor probes for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub namespace: Namespace,
    pub entity_type: EntityType,
    pub path: String,
    pub proxy_url: String,
    /// HTTP transports get `GET /health`; everything else a TCP handshake.
    pub http: bool,
}

impl ProbeTarget {
    /// Derive a probe target from an entity snapshot.
    pub fn from_entity(namespace: &Namespace, entity: &Entity) -> Self {
        let reg = entity.as_registrable();
        let http = reg.supported_transports().is_empty()
            || reg
                .supported_transports()
                .iter()
                .any(Transport::is_http);
        Self {
            namespace: namespace.clone(),
            entity_type: entity.entity_type(),
            path: reg.path().to_string(),
            proxy_url: reg.proxy_url().to_string(),
            http,
        }
    }
}

/// Executes one probe; implementations decide the transport.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns whether the upstream looked alive.
    async fn probe(&self, target: &ProbeTarget) -> bool;
}

/// Default prober: `GET /health` expecting 2xx for HTTP transports, a TCP
/// connect for the rest. `ProbeMethod::TcpConnect` forces the handshake for
/// every target.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
    method: ProbeMethod,
}

impl HttpProber {
    pub fn new(
        timeout: Duration,
        method: ProbeMethod,
        danger_accept_invalid_certs: bool,
    ) -> HealthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(danger_accept_invalid_certs)
            .build()
            .map_err(|e| HealthError::ProbeSetup(e.to_string()))?;
        Ok(Self {
            client,
            timeout,
            method,
        })
    }

    async fn probe_http(&self, target: &ProbeTarget) -> bool {
        let url = format!("{}/health", target.proxy_url.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                if !ok {
                    debug!(path = %target.path, status = %response.status(), "health probe non-2xx");
                }
                ok
            }
            Err(e) => {
                debug!(path = %target.path, error = %e, "health probe failed");
                false
            }
        }
    }

    async fn probe_tcp(&self, target: &ProbeTarget) -> bool {
        let Ok(url) = Url::parse(&target.proxy_url) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let port = match url.port_or_known_default() {
            Some(port) => port,
            None => return false,
        };
        let connect = tokio::net::TcpStream::connect((host, port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(path = %target.path, error = %e, "tcp handshake failed");
                false
            }
            Err(_) => {
                debug!(path = %target.path, "tcp handshake timed out");
                false
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &ProbeTarget) -> bool {
        if target.http && self.method == ProbeMethod::HttpGet {
            self.probe_http(target).await
        } else {
            self.probe_tcp(target).await
        }
    }
}
