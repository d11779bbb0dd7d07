//! Asynchronous security scans for new registrations.
//!
//! A worker drains the scan queue and runs static checks over the entity:
//! proxy URL hygiene, transport sanity, and tool schema shape. Findings are
//! advisory except `high`, which fails the scan. Records survive entity
//! deletion for audit.

use std::sync::Arc;

use chrono::Utc;
use gateway_store::RegistryStore;
use gateway_types::{
    Entity, FindingSeverity, Namespace, Registrable, ScanFinding, ScanStatus, SecurityScanRecord,
    Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One queued scan.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub namespace: Namespace,
    pub record: SecurityScanRecord,
    pub entity: Entity,
}

/// Spawn the scan worker. The task ends when the sender side closes.
pub(crate) fn spawn_scan_worker(
    store: Arc<RegistryStore>,
    mut rx: mpsc::Receiver<ScanJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            run_scan(&store, job).await;
        }
        debug!("scan queue closed, worker stopping");
    })
}

async fn run_scan(store: &RegistryStore, job: ScanJob) {
    let mut record = job.record;
    record.status = ScanStatus::Running;
    record.scanned_at = Utc::now();
    if let Err(e) = store.update_scan(&job.namespace, record.clone()).await {
        warn!(scan = %record.scan_id, error = %e, "failed to mark scan running");
    }

    let findings = collect_findings(&job.entity);
    let failed = findings
        .iter()
        .any(|f| f.severity >= FindingSeverity::High);

    record.findings = findings;
    record.status = if failed {
        ScanStatus::Failed
    } else {
        ScanStatus::Passed
    };
    record.scanned_at = Utc::now();

    debug!(
        scan = %record.scan_id,
        path = %record.entity_path,
        status = ?record.status,
        findings = record.findings.len(),
        "scan finished"
    );
    if let Err(e) = store.update_scan(&job.namespace, record.clone()).await {
        record.status = ScanStatus::Error;
        warn!(scan = %record.scan_id, error = %e, "failed to persist scan result");
    }
}

fn collect_findings(entity: &Entity) -> Vec<ScanFinding> {
    let mut findings = Vec::new();
    let reg = entity.as_registrable();

    if reg.proxy_url().starts_with("http://") {
        findings.push(ScanFinding {
            code: "insecure-proxy-scheme".to_string(),
            severity: FindingSeverity::Medium,
            message: "proxy_url uses plain http".to_string(),
        });
    }
    if let Ok(url) = url_host(reg.proxy_url()) {
        if url == "localhost" || url == "127.0.0.1" {
            findings.push(ScanFinding {
                code: "loopback-proxy-target".to_string(),
                severity: FindingSeverity::Low,
                message: "proxy_url points at loopback".to_string(),
            });
        }
    }
    if reg.supported_transports().is_empty() {
        findings.push(ScanFinding {
            code: "no-declared-transports".to_string(),
            severity: FindingSeverity::Info,
            message: "entity declares no supported transports".to_string(),
        });
    }
    if reg.supported_transports().contains(&Transport::Stdio)
        && reg.supported_transports().len() == 1
        && reg.proxy_url().starts_with("http")
    {
        findings.push(ScanFinding {
            code: "transport-url-mismatch".to_string(),
            severity: FindingSeverity::Low,
            message: "stdio-only entity has an http proxy_url".to_string(),
        });
    }

    if let Entity::Server(server) = entity {
        for tool in &server.tools {
            if !tool.input_schema.is_object() {
                findings.push(ScanFinding {
                    code: "tool-schema-not-object".to_string(),
                    severity: FindingSeverity::Low,
                    message: format!("tool `{}` input schema is not a JSON object", tool.name),
                });
            }
            if tool.description.trim().is_empty() {
                findings.push(ScanFinding {
                    code: "tool-missing-description".to_string(),
                    severity: FindingSeverity::Info,
                    message: format!("tool `{}` has no description", tool.name),
                });
            }
        }
    }

    findings
}

fn url_host(raw: &str) -> Result<String, ()> {
    let rest = raw.split("://").nth(1).ok_or(())?;
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(rest)
        .split('@')
        .last()
        .unwrap_or(rest);
    Ok(host.split(':').next().unwrap_or(host).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gateway_types::{ServerEntity, ToolRecord};

    fn server(proxy_url: &str) -> Entity {
        Entity::Server(ServerEntity {
            path: "/svc/a".to_string(),
            name: "svc".to_string(),
            description: String::new(),
            proxy_url: proxy_url.to_string(),
            supported_transports: [Transport::StreamableHttp].into_iter().collect(),
            tags: Default::default(),
            tools: vec![ToolRecord {
                name: "echo".to_string(),
                description: "echo".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                annotations: None,
                tags: Default::default(),
            }],
            version: String::new(),
            is_enabled: true,
            auth_provider_info: None,
            health: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn plain_http_is_flagged() {
        let findings = collect_findings(&server("http://svc.internal:8080"));
        assert!(findings.iter().any(|f| f.code == "insecure-proxy-scheme"));
    }

    #[test]
    fn https_with_clean_tools_passes_quietly() {
        let findings = collect_findings(&server("https://svc.internal:8443"));
        assert!(findings.is_empty());
    }

    #[test]
    fn loopback_target_is_flagged() {
        let findings = collect_findings(&server("https://127.0.0.1:9000"));
        assert!(findings.iter().any(|f| f.code == "loopback-proxy-target"));
    }

    #[test]
    fn host_extraction_handles_ports_and_paths() {
        assert_eq!(url_host("https://a.b.c:8443/x?q=1").unwrap(), "a.b.c");
        assert_eq!(url_host("http://localhost/x").unwrap(), "localhost");
        assert!(url_host("not-a-url").is_err());
    }
}
