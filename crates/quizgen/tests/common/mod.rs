#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizgen::config::GenerationConfig;
use quizgen::generation::{
    AreaAllocation, Candidate, GeneratedQuestion, GenerationController, GenerationRepo,
    GenerationTarget, NewGenerationJob, ProgressSnapshot, QuestionGenerator,
};
use quizgen::{GenerationError, GeneratorError};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// A default area whose name contains commas.
pub const MEASUREMENT: &str = "Measurement, Data Display, and Interpretation";

/// File-backed sqlite database that lives as long as the value.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("quizgen_test.db").display());

    let pool = quizgen::db::make_pool(&url, 4)
        .await
        .expect("failed to open test database");
    quizgen::db::run_migrations(&pool)
        .await
        .expect("migrations failed");

    TestDb { pool, _dir: dir }
}

/// Short timeouts so timeout paths finish quickly. Any processing job
/// without a live runner in the test counts as orphaned.
pub fn test_config() -> GenerationConfig {
    GenerationConfig {
        generator_timeout: Duration::from_millis(50),
        attempts_per_question: 3,
        max_consecutive_timeouts: 2,
        avoid_hint_limit: 5,
        orphan_after: Duration::ZERO,
        ..GenerationConfig::default()
    }
}

pub fn plan_for(job: &NewGenerationJob) -> Vec<AreaAllocation> {
    test_config()
        .weights
        .distribute(job.requested_count, &job.selected_areas)
}

/// Writes a job straight to the store, skipping admission and the runner.
pub async fn insert_direct(
    repo: &GenerationRepo,
    job: &NewGenerationJob,
) -> Result<Uuid, GenerationError> {
    repo.insert_job(job, &plan_for(job)).await
}

pub fn controller(db: &TestDb, generator: Arc<dyn QuestionGenerator>) -> GenerationController {
    GenerationController::new(db.pool.clone(), generator, test_config())
}

pub fn question(area: &str, n: usize) -> GeneratedQuestion {
    GeneratedQuestion {
        question: format!("[{area}] question #{n}?"),
        options: serde_json::json!({ "A": "yes", "B": "no", "C": "maybe", "D": "never" }),
        correct_answer: "A".into(),
        explanation: "because".into(),
        question_type: "multiple_choice".into(),
        difficulty: Some(3),
        model: Some("stub".into()),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Ok { similarity: f64 },
    ItemError,
    Fatal,
    Hang,
    /// The first call hangs past the timeout, later calls succeed.
    HangOnce,
}

/// Generator with a fixed behavior that counts its calls.
pub struct StubGenerator {
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::new(Behavior::Ok { similarity: 0.0 })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionGenerator for StubGenerator {
    async fn generate(&self, target: &GenerationTarget) -> Result<Candidate, GeneratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Ok { similarity } => Ok(Candidate {
                question: question(&target.content_area, n),
                similarity,
            }),
            Behavior::ItemError => Err(GeneratorError::Item("model returned garbage".into())),
            Behavior::Fatal => Err(GeneratorError::Fatal("generator service unavailable".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(GeneratorError::Item("unreachable".into()))
            }
            Behavior::HangOnce if n == 0 => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(GeneratorError::Item("unreachable".into()))
            }
            Behavior::HangOnce => Ok(Candidate {
                question: question(&target.content_area, n),
                similarity: 0.0,
            }),
        }
    }
}

/// Each call waits for a permit, so a test decides exactly how many
/// candidates complete. Closing the gate turns pending calls into errors.
pub struct GatedGenerator {
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn close(&self) {
        self.gate.close();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionGenerator for GatedGenerator {
    async fn generate(&self, target: &GenerationTarget) -> Result<Candidate, GeneratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.gate.acquire().await {
            Ok(permit) => {
                permit.forget();
                Ok(Candidate {
                    question: question(&target.content_area, n),
                    similarity: 0.0,
                })
            }
            Err(_) => Err(GeneratorError::Item("gate closed".into())),
        }
    }
}

pub async fn wait_until<F>(controller: &GenerationController, job_id: Uuid, pred: F) -> ProgressSnapshot
where
    F: Fn(&ProgressSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snap = controller.progress(job_id).await.expect("progress");
        if pred(&snap) {
            return snap;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting on job {job_id}: {snap:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_terminal(controller: &GenerationController, job_id: Uuid) -> ProgressSnapshot {
    wait_until(controller, job_id, |s| s.status().is_terminal()).await
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}
