// crates/quizgen/src/generation/repo.rs

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::GenerationError;
use crate::generation::distribution::AreaAllocation;
use crate::generation::generator::GeneratedQuestion;
use crate::generation::model::{
    AreaProgress, AreaStatus, JobStatus, NewGenerationJob, ProgressSnapshot,
};
use crate::questions::QuestionsRepo;

const SNAPSHOT_SELECT: &str = r#"
    SELECT
        j.id, j.requested_count, j.skip_dedup, j.selected_areas, j.difficulty_min,
        j.status, j.cancel_requested, j.error_message, j.created_by,
        j.created_at, j.started_at, j.completed_at,
        p.job_id, p.current_area, p.total_generated, p.total_duplicates,
        p.total_errors, p.estimated_cost, p.updated_at
    FROM generation_jobs j
    JOIN generation_progress p ON p.job_id = j.id
"#;

/// Counter increments produced by one candidate outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressDelta {
    pub generated: i64,
    pub duplicates: i64,
    pub errors: i64,
    pub cost: f64,
}

impl ProgressDelta {
    pub fn duplicate() -> Self {
        Self {
            duplicates: 1,
            ..Default::default()
        }
    }

    pub fn error() -> Self {
        Self {
            errors: 1,
            ..Default::default()
        }
    }

    pub fn generated(cost: f64) -> Self {
        Self {
            generated: 1,
            cost,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryCounts {
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Clone)]
pub struct GenerationRepo {
    pool: SqlitePool,
}

impl GenerationRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Admission
    // ----------------------------

    /// Inserts the job, its zeroed progress row and one row per planned
    /// area in one transaction. `plan` order is the processing order.
    ///
    /// The partial unique index on `active_slot` rejects a second
    /// pending/processing job; that violation becomes `AlreadyRunning`.
    pub async fn insert_job(
        &self,
        job: &NewGenerationJob,
        plan: &[AreaAllocation],
    ) -> Result<Uuid, GenerationError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO generation_jobs (
                id, requested_count, skip_dedup, selected_areas, difficulty_min,
                status, created_by, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(job.requested_count as i64)
        .bind(job.skip_dedup)
        .bind(Json(&job.selected_areas))
        .bind(job.difficulty_min)
        .bind(JobStatus::Pending.as_str())
        .bind(job.created_by)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                let active = self.active_job_id().await?;
                return Err(GenerationError::AlreadyRunning { job_id: active });
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            r#"
            INSERT INTO generation_progress (job_id, updated_at)
            VALUES (?, ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (position, alloc) in plan.iter().enumerate() {
            // nothing to do for a zero quota
            let status = if alloc.quota == 0 {
                AreaStatus::Complete
            } else {
                AreaStatus::Pending
            };
            sqlx::query(
                r#"
                INSERT INTO generation_area_progress (job_id, area, position, weight, target, status)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(&alloc.area)
            .bind(position as i64)
            .bind(alloc.weight)
            .bind(alloc.quota as i64)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_snapshot(&self, job_id: Uuid) -> Result<Option<ProgressSnapshot>, sqlx::Error> {
        let sql = format!("{SNAPSHOT_SELECT} WHERE j.id = ?");
        let snapshot = sqlx::query_as::<_, ProgressSnapshot>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        self.with_areas(snapshot).await
    }

    pub async fn active_snapshot(&self) -> Result<Option<ProgressSnapshot>, sqlx::Error> {
        let sql = format!(
            "{SNAPSHOT_SELECT} WHERE j.status IN ('pending', 'processing') ORDER BY j.created_at DESC LIMIT 1"
        );
        let snapshot = sqlx::query_as::<_, ProgressSnapshot>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        self.with_areas(snapshot).await
    }

    /// The job's area plan in processing order.
    pub async fn area_progress(&self, job_id: Uuid) -> Result<Vec<AreaProgress>, sqlx::Error> {
        sqlx::query_as::<_, AreaProgress>(
            r#"
            SELECT area, position, weight, target, done, status
            FROM generation_area_progress
            WHERE job_id = ?
            ORDER BY position
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn with_areas(
        &self,
        snapshot: Option<ProgressSnapshot>,
    ) -> Result<Option<ProgressSnapshot>, sqlx::Error> {
        let Some(mut snapshot) = snapshot else {
            return Ok(None);
        };
        snapshot.areas = self.area_progress(snapshot.job.id).await?;
        Ok(Some(snapshot))
    }

    pub async fn active_job_id(&self) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM generation_jobs
            WHERE status IN ('pending', 'processing')
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Option<JobStatus>, sqlx::Error> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM generation_jobs WHERE id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(status.and_then(|s| JobStatus::parse(&s)))
    }

    /// Newest first. `limit` is clamped to [1, 100].
    pub async fn history(&self, limit: i64) -> Result<Vec<ProgressSnapshot>, sqlx::Error> {
        let limit = limit.clamp(1, 100);
        let sql = format!("{SNAPSHOT_SELECT} ORDER BY j.created_at DESC LIMIT ?");
        let mut snapshots = sqlx::query_as::<_, ProgressSnapshot>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        for s in &mut snapshots {
            s.areas = self.area_progress(s.job.id).await?;
        }
        Ok(snapshots)
    }

    pub async fn pending_job_ids(&self) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM generation_jobs WHERE status = 'pending' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Missing jobs read as cancelled so a runner never keeps going blind.
    pub async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool, sqlx::Error> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM generation_jobs WHERE id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(true))
    }

    // ----------------------------
    // Transitions (single writer: the job's runner)
    // ----------------------------

    /// pending -> processing. False if the job was cancelled or already taken.
    /// Pickup also counts as the first heartbeat.
    pub async fn mark_processing(&self, job_id: Uuid) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'processing',
                started_at = ?
            WHERE id = ?
              AND status = 'pending'
              AND cancel_requested = 0
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE generation_progress SET updated_at = ? WHERE job_id = ?")
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Moves the job onto `area` and flips that area to `generating`.
    pub async fn set_current_area(&self, job_id: Uuid, area: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            UPDATE generation_progress
            SET current_area = ?,
                updated_at = ?
            WHERE job_id = ?
              AND EXISTS (
                  SELECT 1 FROM generation_jobs
                  WHERE id = ? AND status = 'processing'
              )
            "#,
        )
        .bind(area)
        .bind(Utc::now())
        .bind(job_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE generation_area_progress
            SET status = ?
            WHERE job_id = ? AND area = ?
            "#,
        )
        .bind(AreaStatus::Generating.as_str())
        .bind(job_id)
        .bind(area)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Closes an area once its loop is over. Like every runner write it is
    /// a no-op after the job left `processing`.
    pub async fn finish_area(
        &self,
        job_id: Uuid,
        area: &str,
        status: AreaStatus,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            r#"
            UPDATE generation_area_progress
            SET status = ?
            WHERE job_id = ? AND area = ?
              AND EXISTS (
                  SELECT 1 FROM generation_jobs
                  WHERE id = ? AND status = 'processing'
              )
            "#,
        )
        .bind(status.as_str())
        .bind(job_id)
        .bind(area)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// Applies counter increments. Writes nothing once the job left
    /// `processing`, which keeps terminal progress rows frozen.
    pub async fn record_outcome(
        &self,
        job_id: Uuid,
        delta: &ProgressDelta,
    ) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        apply_delta(&mut *conn, job_id, delta).await
    }

    /// Persists an accepted question and counts it on the job and its area,
    /// atomically.
    pub async fn record_accepted(
        &self,
        job_id: Uuid,
        area: &str,
        question: &GeneratedQuestion,
        cost: f64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let counted = apply_delta(&mut *tx, job_id, &ProgressDelta::generated(cost)).await?;
        if !counted {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE generation_area_progress
            SET done = done + 1
            WHERE job_id = ? AND area = ?
            "#,
        )
        .bind(job_id)
        .bind(area)
        .execute(&mut *tx)
        .await?;

        QuestionsRepo::insert_on(&mut *tx, area, question, Some(job_id)).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// processing -> terminal. A `completed` finish turns into `cancelled`
    /// when a cancel request raced the last candidate.
    /// Returns the stored terminal status, or None if the job was not processing.
    pub async fn finalize(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Option<JobStatus>, sqlx::Error> {
        debug_assert!(status.is_terminal());

        let mut tx = self.pool.begin().await?;
        let stored: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE generation_jobs
            SET status = CASE
                    WHEN ? = 'completed' AND cancel_requested = 1 THEN 'cancelled'
                    ELSE ?
                END,
                error_message = ?,
                completed_at = ?
            WHERE id = ?
              AND status = 'processing'
            RETURNING status
            "#,
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        if stored.is_some() {
            stop_open_areas(&mut *tx, job_id).await?;
        }
        tx.commit().await?;

        Ok(stored.and_then(|s| JobStatus::parse(&s)))
    }

    // ----------------------------
    // Cancellation
    // ----------------------------

    /// Pending jobs are cancelled on the spot; processing jobs get the flag
    /// and are finalized by their runner at the next checkpoint.
    /// Returns the job status right after the request.
    pub async fn request_cancel(&self, job_id: Uuid) -> Result<JobStatus, GenerationError> {
        let mut tx = self.pool.begin().await?;
        let cancelled_pending = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'cancelled',
                cancel_requested = 1,
                completed_at = ?
            WHERE id = ?
              AND status = 'pending'
            "#,
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if cancelled_pending == 1 {
            stop_open_areas(&mut *tx, job_id).await?;
            tx.commit().await?;
            return Ok(JobStatus::Cancelled);
        }
        tx.rollback().await?;

        let flagged = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET cancel_requested = 1
            WHERE id = ?
              AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if flagged == 1 {
            return Ok(JobStatus::Processing);
        }

        match self.get_status(job_id).await? {
            None => Err(GenerationError::NotFound(job_id)),
            Some(status) if status.is_terminal() => {
                Err(GenerationError::AlreadyTerminal { job_id, status })
            }
            Some(status) => Ok(status),
        }
    }

    // ----------------------------
    // Orphan reaping
    // ----------------------------

    /// Finalizes `processing` jobs whose runner stopped heartbeating, i.e.
    /// whose progress row was last written before `stale_before`. They end
    /// as `cancelled` if a cancel was requested, `failed` otherwise.
    /// Jobs with a live runner (in this or another process) are untouched.
    pub async fn finalize_orphaned(
        &self,
        reason: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<RecoveryCounts, sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'cancelled',
                completed_at = ?
            WHERE status = 'processing'
              AND cancel_requested = 1
              AND id IN (
                  SELECT job_id FROM generation_progress WHERE updated_at < ?
              )
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'failed',
                error_message = ?,
                completed_at = ?
            WHERE status = 'processing'
              AND id IN (
                  SELECT job_id FROM generation_progress WHERE updated_at < ?
              )
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(stale_before)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if failed + cancelled > 0 {
            sqlx::query(
                r#"
                UPDATE generation_area_progress
                SET status = 'stopped'
                WHERE status IN ('pending', 'generating')
                  AND job_id IN (
                      SELECT id FROM generation_jobs WHERE status IN ('failed', 'cancelled')
                  )
                "#,
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(RecoveryCounts { failed, cancelled })
    }
}

/// Areas a finished job never got to (or was in the middle of) become `stopped`.
async fn stop_open_areas(conn: &mut SqliteConnection, job_id: Uuid) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"
        UPDATE generation_area_progress
        SET status = 'stopped'
        WHERE job_id = ?
          AND status IN ('pending', 'generating')
        "#,
    )
    .bind(job_id)
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected())
}

async fn apply_delta(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    delta: &ProgressDelta,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"
        UPDATE generation_progress
        SET total_generated = total_generated + ?,
            total_duplicates = total_duplicates + ?,
            total_errors = total_errors + ?,
            estimated_cost = estimated_cost + ?,
            updated_at = ?
        WHERE job_id = ?
          AND EXISTS (
              SELECT 1 FROM generation_jobs
              WHERE id = ? AND status = 'processing'
          )
        "#,
    )
    .bind(delta.generated.max(0))
    .bind(delta.duplicates.max(0))
    .bind(delta.errors.max(0))
    .bind(delta.cost.max(0.0))
    .bind(Utc::now())
    .bind(job_id)
    .bind(job_id)
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected() == 1)
}
