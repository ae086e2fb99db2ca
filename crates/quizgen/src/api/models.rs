// crates/quizgen/src/api/models.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GenerationError;
use crate::generation::{AreaAllocation, AreaProgress, CostModel, JobStatus, ProgressSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub job_id: Uuid,
    pub running: bool,
    pub status: JobStatus,
    pub requested_count: i64,
    pub skip_dedup: bool,
    pub selected_areas: Vec<String>,
    pub total_generated: i64,
    pub total_duplicates: i64,
    pub total_errors: i64,
    pub current_area: Option<String>,
    /// Per-area target, done count and status, in processing order.
    pub areas: Vec<AreaProgress>,
    pub estimated_cost: f64,
    pub error_message: Option<String>,
    pub created_by: i64,

    pub elapsed_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProgressSnapshot> for ProgressResponse {
    fn from(s: ProgressSnapshot) -> Self {
        let elapsed_seconds = s.elapsed_seconds(Utc::now());
        Self {
            job_id: s.job.id,
            running: s.is_running(),
            status: s.status(),
            requested_count: s.job.requested_count,
            skip_dedup: s.job.skip_dedup,
            selected_areas: s.job.selected_areas.0,
            total_generated: s.progress.total_generated,
            total_duplicates: s.progress.total_duplicates,
            total_errors: s.progress.total_errors,
            current_area: s.progress.current_area,
            areas: s.areas,
            estimated_cost: s.progress.estimated_cost,
            error_message: s.job.error_message,
            created_by: s.job.created_by,
            elapsed_seconds,
            created_at: s.job.created_at,
            started_at: s.job.started_at,
            completed_at: s.job.completed_at,
            updated_at: s.progress.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ActiveResponse {
    Active(ProgressResponse),
    Idle { running: bool },
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub job_id: Uuid,
    pub distribution: Vec<AreaAllocation>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<ProgressResponse>,
}

/// `?count=N&areas=A&areas=B`. Each `areas` value is one area name taken
/// as is, so names containing commas survive. No areas means every area.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewQuery {
    pub count: i64,
    pub areas: Option<Vec<String>>,
}

impl PreviewQuery {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, GenerationError> {
        let mut count = None;
        let mut areas = Vec::new();

        for (key, value) in pairs {
            match key.as_str() {
                "count" => {
                    let parsed = value.trim().parse::<i64>().map_err(|_| {
                        GenerationError::invalid(
                            "malformed_query",
                            format!("count must be an integer, got '{value}'"),
                        )
                    })?;
                    count = Some(parsed);
                }
                "areas" | "areas[]" => {
                    let area = value.trim();
                    if !area.is_empty() {
                        areas.push(area.to_string());
                    }
                }
                _ => {}
            }
        }

        let count =
            count.ok_or_else(|| GenerationError::invalid("malformed_query", "count is required"))?;
        Ok(Self {
            count,
            areas: (!areas.is_empty()).then_some(areas),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub area_weights: BTreeMap<String, f64>,
    pub cost: CostModel,
    pub count_min: i64,
    pub count_max: i64,
    pub generator_timeout_ms: u64,
    pub attempts_per_question: u32,
    pub max_consecutive_timeouts: u32,
    pub dedup_threshold: f64,
}
