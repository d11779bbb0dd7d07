use thiserror::Error;

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// Supervisor-internal errors. These never escape to gateway callers.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("probe setup failed: {0}")]
    ProbeSetup(String),

    #[error("invalid probe target: {0}")]
    InvalidTarget(String),
}
