use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::generation::model::JobStatus;

/// Errors surfaced to callers of the generation controller.
///
/// Per-item generator failures never appear here; they are folded into the
/// job's progress counters.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid request ({reason}): {message}")]
    InvalidRequest {
        reason: &'static str,
        message: String,
    },

    #[error("a generation job is already running")]
    AlreadyRunning { job_id: Option<Uuid> },

    #[error("generation job {0} not found")]
    NotFound(Uuid),

    #[error("no generation job is active")]
    NoActiveJob,

    #[error("generation job {job_id} is already {status}")]
    AlreadyTerminal { job_id: Uuid, status: JobStatus },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl GenerationError {
    pub fn invalid(reason: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason,
            message: message.into(),
        }
    }

    /// Machine-readable code for API bodies.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { reason, .. } => reason,
            Self::AlreadyRunning { .. } => "already_running",
            Self::NotFound(_) => "not_found",
            Self::NoActiveJob => "no_active_job",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::Store(_) => "store_error",
        }
    }
}

/// Outcome of a single failed generator call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeneratorError {
    /// The candidate could not be produced; the job carries on.
    #[error("candidate failed: {0}")]
    Item(String),

    #[error("generator call timed out after {0:?}")]
    Timeout(Duration),

    /// The generator dependency is down; the job is aborted.
    #[error("generator unavailable: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("weight table is empty")]
    Empty,

    #[error("weight for area '{area}' must be positive, got {weight}")]
    NonPositive { area: String, weight: f64 },

    #[error("weights must sum to 1.0, got {0}")]
    BadSum(f64),

    #[error("failed to parse weight table: {0}")]
    Parse(#[from] serde_json::Error),
}
