use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GenerationJob {
    pub id: Uuid,
    pub requested_count: i64,
    pub skip_dedup: bool,
    pub selected_areas: Json<Vec<String>>,
    pub difficulty_min: Option<i64>,
    pub status: String,
    pub cancel_requested: bool,
    pub error_message: Option<String>,
    pub created_by: i64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    pub fn status(&self) -> JobStatus {
        // rows are only ever written through JobStatus::as_str
        JobStatus::parse(&self.status).unwrap_or(JobStatus::Failed)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GenerationProgress {
    pub job_id: Uuid,
    pub current_area: Option<String>,
    pub total_generated: i64,
    pub total_duplicates: i64,
    pub total_errors: i64,
    pub estimated_cost: f64,
    pub updated_at: DateTime<Utc>,
}

/// One area of a job's plan with its own counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AreaProgress {
    pub area: String,
    #[serde(skip)]
    pub position: i64,
    pub weight: f64,
    pub target: i64,
    pub done: i64,
    pub status: String,
}

impl AreaProgress {
    pub fn status(&self) -> AreaStatus {
        AreaStatus::parse(&self.status).unwrap_or(AreaStatus::Stopped)
    }
}

/// Joined job + progress row, as read by pollers.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProgressSnapshot {
    #[sqlx(flatten)]
    pub job: GenerationJob,
    #[sqlx(flatten)]
    pub progress: GenerationProgress,
    /// Filled by the repo after the join, in processing order.
    #[sqlx(skip)]
    pub areas: Vec<AreaProgress>,
}

impl ProgressSnapshot {
    pub fn status(&self) -> JobStatus {
        self.job.status()
    }

    pub fn is_running(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Whole seconds since pickup, frozen once the job finished.
    /// Zero for a job that never started.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        let Some(started) = self.job.started_at else {
            return 0;
        };
        let end = self.job.completed_at.unwrap_or(now);
        (end - started).num_seconds().max(0)
    }
}

/// A validated, ready-to-insert job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGenerationJob {
    pub requested_count: u32,
    pub skip_dedup: bool,
    pub selected_areas: Vec<String>,
    pub difficulty_min: Option<i64>,
    pub created_by: i64,
}

/// Raw admission request as it arrives over the wire.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub count: i64,
    #[serde(default)]
    pub skip_dedup: bool,
    #[serde(default)]
    pub difficulty_min: Option<i64>,
    #[serde(default)]
    pub selected_areas: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaStatus {
    Pending,
    Generating,
    /// Target reached.
    Complete,
    /// Attempt budget ran out below target.
    Exhausted,
    /// The job ended before the area finished.
    Stopped,
}

impl AreaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaStatus::Pending => "pending",
            AreaStatus::Generating => "generating",
            AreaStatus::Complete => "complete",
            AreaStatus::Exhausted => "exhausted",
            AreaStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AreaStatus::Pending),
            "generating" => Some(AreaStatus::Generating),
            "complete" => Some(AreaStatus::Complete),
            "exhausted" => Some(AreaStatus::Exhausted),
            "stopped" => Some(AreaStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
