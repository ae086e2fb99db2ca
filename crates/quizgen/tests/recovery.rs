// tests/recovery.rs
mod common;

use std::time::Duration;

use chrono::Utc;
use common::{controller, insert_direct, setup_db, test_config, wait_terminal, StubGenerator};

use quizgen::config::GenerationConfig;
use quizgen::generation::repo::ProgressDelta;
use quizgen::generation::{AreaStatus, GenerationController, JobStatus, NewGenerationJob};

fn new_job(count: u32) -> NewGenerationJob {
    NewGenerationJob {
        requested_count: count,
        skip_dedup: false,
        selected_areas: vec!["Ethics".into()],
        difficulty_min: None,
        created_by: 0,
    }
}

#[tokio::test]
async fn orphaned_processing_job_is_failed_on_startup() {
    let db = setup_db().await;
    let ctl = controller(&db, StubGenerator::always_ok());

    // a previous process picked the job up and died
    let job_id = insert_direct(ctl.jobs(), &new_job(5)).await.unwrap();
    assert!(ctl.jobs().mark_processing(job_id).await.unwrap());
    ctl.jobs()
        .record_outcome(job_id, &ProgressDelta::generated(0.10))
        .await
        .unwrap();

    let report = ctl.recover().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 0);
    assert!(report.resumed.is_empty());

    let snap = ctl.progress(job_id).await.unwrap();
    assert_eq!(snap.status(), JobStatus::Failed);
    assert_eq!(
        snap.job.error_message.as_deref(),
        Some("interrupted by controller restart")
    );
    assert_eq!(snap.progress.total_generated, 1);
    assert!(snap.areas.iter().all(|a| a.status() == AreaStatus::Stopped));
    assert!(ctl.active().await.unwrap().is_none());
}

#[tokio::test]
async fn job_with_a_fresh_heartbeat_is_not_reaped() {
    let db = setup_db().await;
    let cfg = GenerationConfig {
        orphan_after: Duration::from_secs(60),
        ..test_config()
    };
    let ctl = GenerationController::new(db.pool.clone(), StubGenerator::always_ok(), cfg);

    // another instance is running this job right now
    let job_id = insert_direct(ctl.jobs(), &new_job(5)).await.unwrap();
    assert!(ctl.jobs().mark_processing(job_id).await.unwrap());
    ctl.jobs()
        .record_outcome(job_id, &ProgressDelta::generated(0.10))
        .await
        .unwrap();

    let report = ctl.recover().await.unwrap();
    assert_eq!((report.failed, report.cancelled), (0, 0));
    assert_eq!(
        ctl.jobs().get_status(job_id).await.unwrap(),
        Some(JobStatus::Processing)
    );

    // its runner goes quiet for longer than orphan_after
    sqlx::query("UPDATE generation_progress SET updated_at = ? WHERE job_id = ?")
        .bind(Utc::now() - chrono::Duration::minutes(5))
        .bind(job_id)
        .execute(&db.pool)
        .await
        .unwrap();

    let reaped = ctl.reap_orphans().await.unwrap();
    assert_eq!(reaped.failed, 1);
    let snap = ctl.progress(job_id).await.unwrap();
    assert_eq!(snap.status(), JobStatus::Failed);
    assert_eq!(snap.progress.total_generated, 1);
}

#[tokio::test]
async fn orphan_with_pending_cancel_ends_cancelled() {
    let db = setup_db().await;
    let ctl = controller(&db, StubGenerator::always_ok());

    let job_id = insert_direct(ctl.jobs(), &new_job(5)).await.unwrap();
    assert!(ctl.jobs().mark_processing(job_id).await.unwrap());
    assert_eq!(ctl.cancel(job_id).await.unwrap(), JobStatus::Processing);

    let report = ctl.recover().await.unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.failed, 0);

    let snap = ctl.progress(job_id).await.unwrap();
    assert_eq!(snap.status(), JobStatus::Cancelled);
    assert!(snap.job.error_message.is_none());
}

#[tokio::test]
async fn pending_job_is_resumed_on_startup() {
    let db = setup_db().await;
    let ctl = controller(&db, StubGenerator::always_ok());

    let job_id = insert_direct(ctl.jobs(), &new_job(4)).await.unwrap();

    let report = ctl.recover().await.unwrap();
    assert_eq!(report.resumed, vec![job_id]);

    let done = wait_terminal(&ctl, job_id).await;
    assert_eq!(done.status(), JobStatus::Completed);
    assert_eq!(done.progress.total_generated, 4);
}

#[tokio::test]
async fn terminal_rows_reject_further_writes() {
    let db = setup_db().await;
    let ctl = controller(&db, StubGenerator::always_ok());
    let repo = ctl.jobs();

    let job_id = insert_direct(repo, &new_job(5)).await.unwrap();
    assert!(repo.mark_processing(job_id).await.unwrap());
    assert_eq!(
        repo.finalize(job_id, JobStatus::Completed, None).await.unwrap(),
        Some(JobStatus::Completed)
    );

    assert!(!repo
        .record_outcome(job_id, &ProgressDelta::error())
        .await
        .unwrap());
    assert!(!repo.set_current_area(job_id, "Ethics").await.unwrap());
    assert_eq!(
        repo.finalize(job_id, JobStatus::Failed, Some("late")).await.unwrap(),
        None
    );
    assert!(!repo.mark_processing(job_id).await.unwrap());

    let question = common::question("Ethics", 0);
    assert!(!repo
        .record_accepted(job_id, "Ethics", &question, 0.1)
        .await
        .unwrap());

    let snap = ctl.progress(job_id).await.unwrap();
    assert_eq!(snap.status(), JobStatus::Completed);
    assert_eq!(snap.progress.total_errors, 0);
    assert_eq!(snap.progress.total_generated, 0);
    assert!(snap.progress.current_area.is_none());
    assert!(snap.job.error_message.is_none());
    assert_eq!(common::count_rows(&db.pool, "questions").await, 0);
}

#[tokio::test]
async fn completion_racing_a_cancel_is_recorded_as_cancelled() {
    let db = setup_db().await;
    let ctl = controller(&db, StubGenerator::always_ok());
    let repo = ctl.jobs();

    let job_id = insert_direct(repo, &new_job(1)).await.unwrap();
    assert!(repo.mark_processing(job_id).await.unwrap());
    repo.request_cancel(job_id).await.unwrap();

    assert_eq!(
        repo.finalize(job_id, JobStatus::Completed, None).await.unwrap(),
        Some(JobStatus::Cancelled)
    );
}
