use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::error::{GenerationError, GeneratorError};
use crate::generation::admission;
use crate::generation::cost::CostEstimate;
use crate::generation::distribution::AreaAllocation;
use crate::generation::generator::{GenerationTarget, QuestionGenerator};
use crate::generation::model::{AreaStatus, GenerationRequest, JobStatus, ProgressSnapshot};
use crate::generation::repo::{GenerationRepo, ProgressDelta, RecoveryCounts};
use crate::questions::{PoolStats, QuestionsRepo};

pub const RESTART_INTERRUPTED: &str = "interrupted by controller restart";

#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub distribution: Vec<AreaAllocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub count: u32,
    pub distribution: Vec<AreaAllocation>,
    pub cost_estimate: CostEstimate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed: u64,
    pub cancelled: u64,
    pub resumed: Vec<Uuid>,
}

enum LoopExit {
    Finished,
    Cancelled,
    /// The job left `processing` underneath the loop; nothing left to finalize.
    Detached,
}

enum LoopFailure {
    Fatal(String),
    Store(sqlx::Error),
}

impl From<sqlx::Error> for LoopFailure {
    fn from(e: sqlx::Error) -> Self {
        LoopFailure::Store(e)
    }
}

/// Owns the lifecycle of generation jobs: admission, the execution loop,
/// cancellation and startup reconciliation.
#[derive(Clone)]
pub struct GenerationController {
    jobs: GenerationRepo,
    questions: QuestionsRepo,
    generator: Arc<dyn QuestionGenerator>,
    cfg: Arc<GenerationConfig>,
}

impl GenerationController {
    pub fn new(
        pool: SqlitePool,
        generator: Arc<dyn QuestionGenerator>,
        cfg: GenerationConfig,
    ) -> Self {
        Self {
            jobs: GenerationRepo::new(pool.clone()),
            questions: QuestionsRepo::new(pool),
            generator,
            cfg: Arc::new(cfg),
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.cfg
    }

    pub fn jobs(&self) -> &GenerationRepo {
        &self.jobs
    }

    // ----------------------------
    // Admission
    // ----------------------------

    /// Validates the request, claims the single active slot and spawns the
    /// execution loop. Nothing is written when validation fails.
    pub async fn submit(
        &self,
        req: GenerationRequest,
        created_by: i64,
    ) -> Result<JobHandle, GenerationError> {
        let new_job = admission::validate_request(req, &self.cfg.weights, created_by)?;
        let distribution = self
            .cfg
            .weights
            .distribute(new_job.requested_count, &new_job.selected_areas);

        let job_id = self.jobs.insert_job(&new_job, &distribution).await?;
        info!(
            job_id = %job_id,
            count = new_job.requested_count,
            areas = new_job.selected_areas.len(),
            skip_dedup = new_job.skip_dedup,
            created_by,
            "generation job admitted"
        );

        self.spawn(job_id);
        Ok(JobHandle {
            job_id,
            distribution,
        })
    }

    pub fn spawn(&self, job_id: Uuid) -> JoinHandle<Option<JobStatus>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(job_id).await })
    }

    // ----------------------------
    // Execution
    // ----------------------------

    /// Drives one job to a terminal state. Returns the stored terminal
    /// status, or None when this call did not own the job.
    pub async fn run(&self, job_id: Uuid) -> Option<JobStatus> {
        match self.execute(job_id).await {
            Ok(status) => status,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "generation job could not be finalized");
                None
            }
        }
    }

    async fn execute(&self, job_id: Uuid) -> Result<Option<JobStatus>, sqlx::Error> {
        if !self.jobs.mark_processing(job_id).await? {
            debug!(job_id = %job_id, "job not picked up (cancelled or already taken)");
            return Ok(None);
        }

        let (status, message) = match self.drive(job_id).await {
            Ok(LoopExit::Finished) => (JobStatus::Completed, None),
            Ok(LoopExit::Cancelled) => (JobStatus::Cancelled, None),
            Ok(LoopExit::Detached) => {
                warn!(job_id = %job_id, "job left processing while running");
                return Ok(None);
            }
            Err(LoopFailure::Fatal(msg)) => {
                warn!(job_id = %job_id, error = %msg, "generation aborted");
                (JobStatus::Failed, Some(msg))
            }
            Err(LoopFailure::Store(e)) => {
                error!(job_id = %job_id, error = %e, "store error during generation");
                (JobStatus::Failed, Some(format!("store error: {e}")))
            }
        };

        let stored = self.jobs.finalize(job_id, status, message.as_deref()).await?;
        if let Some(final_status) = stored {
            match self.jobs.get_snapshot(job_id).await {
                Ok(Some(done)) => info!(
                    job_id = %job_id,
                    status = %final_status,
                    generated = done.progress.total_generated,
                    duplicates = done.progress.total_duplicates,
                    errors = done.progress.total_errors,
                    cost = done.progress.estimated_cost,
                    "generation finished"
                ),
                Ok(None) => {}
                Err(e) => warn!(
                    job_id = %job_id,
                    status = %final_status,
                    error = %e,
                    "generation finished; final progress unreadable"
                ),
            }
        }
        Ok(stored)
    }

    /// The loop proper. Runs over the area plan stored at admission.
    async fn drive(&self, job_id: Uuid) -> Result<LoopExit, LoopFailure> {
        let Some(snapshot) = self.jobs.get_snapshot(job_id).await? else {
            return Ok(LoopExit::Detached);
        };
        let job = &snapshot.job;
        info!(job_id = %job_id, requested = job.requested_count, "generation started");

        let requested = u32::try_from(job.requested_count).unwrap_or(0);
        let marginal_cost = self.cfg.cost.marginal_cost(job.skip_dedup);
        let avoid_limit = usize::try_from(self.cfg.avoid_hint_limit).unwrap_or(0);

        let mut generated: u32 = 0;
        let mut consecutive_timeouts: u32 = 0;

        let open = snapshot
            .areas
            .iter()
            .filter(|a| matches!(a.status(), AreaStatus::Pending | AreaStatus::Generating));

        for alloc in open {
            if generated >= requested {
                break;
            }
            let quota = u32::try_from(alloc.target).unwrap_or(0);

            // area boundary checkpoint
            if self.jobs.is_cancel_requested(job.id).await? {
                return Ok(LoopExit::Cancelled);
            }
            if !self.jobs.set_current_area(job.id, &alloc.area).await? {
                return Ok(LoopExit::Detached);
            }

            let mut avoid = self
                .questions
                .recent_stems(&alloc.area, self.cfg.avoid_hint_limit)
                .await?;

            let budget = quota.saturating_mul(self.cfg.attempts_per_question);
            let mut accepted: u32 = 0;
            let mut attempts: u32 = 0;

            while accepted < quota && attempts < budget && generated < requested {
                attempts += 1;

                let target = GenerationTarget {
                    content_area: alloc.area.clone(),
                    difficulty_min: job.difficulty_min,
                    skip_dedup: job.skip_dedup,
                    avoid: avoid.clone(),
                };

                let outcome =
                    match timeout(self.cfg.generator_timeout, self.generator.generate(&target))
                        .await
                    {
                        Ok(res) => res,
                        Err(_) => Err(GeneratorError::Timeout(self.cfg.generator_timeout)),
                    };

                let still_processing = match outcome {
                    Ok(candidate) => {
                        consecutive_timeouts = 0;
                        if !job.skip_dedup && candidate.similarity >= self.cfg.dedup_threshold {
                            debug!(
                                job_id = %job.id,
                                area = %alloc.area,
                                similarity = candidate.similarity,
                                "duplicate candidate rejected"
                            );
                            self.jobs
                                .record_outcome(job.id, &ProgressDelta::duplicate())
                                .await?
                        } else {
                            let counted = self
                                .jobs
                                .record_accepted(job.id, &alloc.area, &candidate.question, marginal_cost)
                                .await?;
                            if counted {
                                accepted += 1;
                                generated += 1;
                                if avoid_limit > 0 {
                                    avoid.insert(0, candidate.question.question);
                                    avoid.truncate(avoid_limit);
                                }
                            }
                            counted
                        }
                    }
                    Err(GeneratorError::Timeout(after)) => {
                        consecutive_timeouts += 1;
                        warn!(
                            job_id = %job.id,
                            area = %alloc.area,
                            consecutive = consecutive_timeouts,
                            "generator call timed out after {after:?}"
                        );
                        let counted = self
                            .jobs
                            .record_outcome(job.id, &ProgressDelta::error())
                            .await?;
                        if consecutive_timeouts > self.cfg.max_consecutive_timeouts {
                            return Err(LoopFailure::Fatal(format!(
                                "generator timed out {consecutive_timeouts} times in a row"
                            )));
                        }
                        counted
                    }
                    Err(GeneratorError::Item(msg)) => {
                        consecutive_timeouts = 0;
                        warn!(job_id = %job.id, area = %alloc.area, error = %msg, "candidate failed");
                        self.jobs
                            .record_outcome(job.id, &ProgressDelta::error())
                            .await?
                    }
                    Err(GeneratorError::Fatal(msg)) => return Err(LoopFailure::Fatal(msg)),
                };

                if !still_processing {
                    return Ok(LoopExit::Detached);
                }

                // candidate checkpoint
                if self.jobs.is_cancel_requested(job.id).await? {
                    return Ok(LoopExit::Cancelled);
                }
            }

            let area_status = if accepted >= quota {
                AreaStatus::Complete
            } else {
                info!(
                    job_id = %job.id,
                    area = %alloc.area,
                    quota,
                    accepted,
                    attempts,
                    "area attempt budget exhausted"
                );
                AreaStatus::Exhausted
            };
            if !self.jobs.finish_area(job.id, &alloc.area, area_status).await? {
                return Ok(LoopExit::Detached);
            }
        }

        Ok(LoopExit::Finished)
    }

    // ----------------------------
    // Cancellation
    // ----------------------------

    /// Returns the job status right after the request: `cancelled` for a
    /// pending job, `processing` while the loop winds down.
    pub async fn cancel(&self, job_id: Uuid) -> Result<JobStatus, GenerationError> {
        let status = self.jobs.request_cancel(job_id).await?;
        info!(job_id = %job_id, status = %status, "cancellation requested");
        Ok(status)
    }

    pub async fn cancel_active(&self) -> Result<(Uuid, JobStatus), GenerationError> {
        let job_id = self
            .jobs
            .active_job_id()
            .await?
            .ok_or(GenerationError::NoActiveJob)?;
        let status = self.cancel(job_id).await?;
        Ok((job_id, status))
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn progress(&self, job_id: Uuid) -> Result<ProgressSnapshot, GenerationError> {
        self.jobs
            .get_snapshot(job_id)
            .await?
            .ok_or(GenerationError::NotFound(job_id))
    }

    pub async fn active(&self) -> Result<Option<ProgressSnapshot>, GenerationError> {
        Ok(self.jobs.active_snapshot().await?)
    }

    pub async fn history(&self, limit: i64) -> Result<Vec<ProgressSnapshot>, GenerationError> {
        Ok(self.jobs.history(limit).await?)
    }

    pub async fn pool_stats(&self) -> Result<PoolStats, GenerationError> {
        let counts = self.questions.counts_by_area().await?;
        Ok(PoolStats::from_counts(&counts, &self.cfg.weights))
    }

    /// Pure computation; validates like admission but touches no state.
    pub fn preview(
        &self,
        count: i64,
        areas: Option<Vec<String>>,
    ) -> Result<Preview, GenerationError> {
        let count = admission::validate_count(count)?;
        let areas = admission::resolve_areas(areas, &self.cfg.weights)?;
        Ok(Preview {
            count,
            distribution: self.cfg.weights.distribute(count, &areas),
            cost_estimate: self.cfg.cost.estimate(count),
        })
    }

    // ----------------------------
    // Orphans & startup
    // ----------------------------

    /// Progress rows older than this belong to a runner that is gone.
    fn stale_cutoff(&self) -> Option<DateTime<Utc>> {
        let age = chrono::Duration::from_std(self.cfg.orphan_after).ok()?;
        Utc::now().checked_sub_signed(age)
    }

    /// Finalizes `processing` jobs whose runner stopped heartbeating for
    /// longer than `orphan_after`. Live runners keep their jobs.
    pub async fn reap_orphans(&self) -> Result<RecoveryCounts, GenerationError> {
        let Some(stale_before) = self.stale_cutoff() else {
            return Ok(RecoveryCounts::default());
        };
        let orphans = self
            .jobs
            .finalize_orphaned(RESTART_INTERRUPTED, stale_before)
            .await?;
        if orphans.failed > 0 || orphans.cancelled > 0 {
            warn!(
                failed = orphans.failed,
                cancelled = orphans.cancelled,
                "finalized orphaned generation jobs"
            );
        }
        Ok(orphans)
    }

    /// Reaps orphaned jobs and resumes pending ones. Resuming is safe with
    /// other instances around: only one pickup of a job can succeed.
    pub async fn recover(&self) -> Result<RecoveryReport, GenerationError> {
        let orphans = self.reap_orphans().await?;

        let resumed = self.jobs.pending_job_ids().await?;
        for job_id in &resumed {
            info!(job_id = %job_id, "resuming pending generation job");
            self.spawn(*job_id);
        }

        Ok(RecoveryReport {
            failed: orphans.failed,
            cancelled: orphans.cancelled,
            resumed,
        })
    }
}
