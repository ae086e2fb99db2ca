use std::env;

use anyhow::Context;
use chrono::Utc;
use quizgen::config::GenerationConfig;
use quizgen::db::{make_pool, run_migrations};
use quizgen::generation::controller::RESTART_INTERRUPTED;
use quizgen::generation::{admission, GenerationRepo, ProgressSnapshot};
use quizgen::questions::{PoolStats, QuestionsRepo};
use sqlx::SqlitePool;
use uuid::Uuid;

const USAGE: &str = "quizgenctl <command>\n\
     Commands:\n\
     - status <job_id>\n\
     - active\n\
     - history [n]\n\
     - cancel <job_id|active>\n\
     - preview <count> [area]...\n\
     - pool\n\
     - recover [--all]\n\
     - reset\n\
     \n\
     Uses QUIZGEN_DATABASE_URL or DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let cfg = GenerationConfig::from_env()?;

    // preview is pure; no database needed
    if args[1] == "preview" {
        let count: i64 = args
            .get(2)
            .context("usage: quizgenctl preview <count> [area]...")?
            .parse()?;
        // one argument per area; names may contain commas
        let areas: Vec<String> = args[3..].to_vec();
        let areas = (!areas.is_empty()).then_some(areas);
        print_preview(&cfg, count, areas)?;
        return Ok(());
    }

    let url = env::var("QUIZGEN_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .context("QUIZGEN_DATABASE_URL or DATABASE_URL must be set")?;
    let pool = make_pool(&url, 2).await?;
    run_migrations(&pool).await?;
    let jobs = GenerationRepo::new(pool.clone());

    match args[1].as_str() {
        "status" => {
            let job_id: Uuid = args
                .get(2)
                .context("usage: quizgenctl status <job_id>")?
                .parse()?;
            match jobs.get_snapshot(job_id).await? {
                Some(s) => print_snapshot(&s),
                None => {
                    eprintln!("job {job_id} not found");
                    std::process::exit(1);
                }
            }
        }
        "active" => match jobs.active_snapshot().await? {
            Some(s) => print_snapshot(&s),
            None => println!("no active job"),
        },
        "history" => {
            let n: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            for s in jobs.history(n).await? {
                print_row(&s);
            }
        }
        "cancel" => {
            let target = args.get(2).context("usage: quizgenctl cancel <job_id|active>")?;
            let job_id = if target == "active" {
                jobs.active_job_id().await?.context("no active job")?
            } else {
                target.parse()?
            };
            let status = jobs.request_cancel(job_id).await?;
            println!("cancel requested for {job_id}: status={status}");
        }
        "pool" => print_pool(&pool, &cfg).await?,
        "recover" => {
            // --all also takes jobs whose runner may still be alive
            let stale_before = if args.get(2).map(String::as_str) == Some("--all") {
                Utc::now()
            } else {
                Utc::now() - chrono::Duration::from_std(cfg.orphan_after)?
            };
            let counts = jobs
                .finalize_orphaned(RESTART_INTERRUPTED, stale_before)
                .await?;
            println!(
                "recovered: failed={} cancelled={}",
                counts.failed, counts.cancelled
            );
        }
        "reset" => reset(&pool).await?,
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn print_snapshot(s: &ProgressSnapshot) {
    let p = &s.progress;
    println!("job        {}", s.job.id);
    println!("status     {}", s.status());
    println!(
        "progress   {}/{} generated, {} duplicates, {} errors",
        p.total_generated, s.job.requested_count, p.total_duplicates, p.total_errors
    );
    println!("area       {}", p.current_area.as_deref().unwrap_or("-"));
    println!("cost       ${:.2}", p.estimated_cost);
    println!("created    {}", s.job.created_at);
    if let Some(t) = s.job.started_at {
        println!("started    {t}");
    }
    if let Some(t) = s.job.completed_at {
        println!("completed  {t}");
    }
    if let Some(msg) = &s.job.error_message {
        println!("error      {msg}");
    }
    println!("elapsed    {}s", s.elapsed_seconds(Utc::now()));
    for a in &s.areas {
        println!("  {:<44} {:>3}/{:<3} {}", a.area, a.done, a.target, a.status);
    }
}

fn print_row(s: &ProgressSnapshot) {
    println!(
        "{} | {:<10} | {:>3}/{:<3} | dup={} err={} | ${:.2} | {}",
        s.job.id,
        s.status(),
        s.progress.total_generated,
        s.job.requested_count,
        s.progress.total_duplicates,
        s.progress.total_errors,
        s.progress.estimated_cost,
        s.job.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_preview(cfg: &GenerationConfig, count: i64, areas: Option<Vec<String>>) -> anyhow::Result<()> {
    let count = admission::validate_count(count)?;
    let areas = admission::resolve_areas(areas, &cfg.weights)?;
    for alloc in cfg.weights.distribute(count, &areas) {
        println!("{:<40} w={:.2} quota={}", alloc.area, alloc.weight, alloc.quota);
    }
    let est = cfg.cost.estimate(count);
    println!(
        "cost: ${:.2} with dedup, ${:.2} without",
        est.with_dedup, est.without_dedup
    );
    Ok(())
}

async fn print_pool(pool: &SqlitePool, cfg: &GenerationConfig) -> anyhow::Result<()> {
    let counts = QuestionsRepo::new(pool.clone()).counts_by_area().await?;
    let stats = PoolStats::from_counts(&counts, &cfg.weights);
    println!(
        "pool: {} questions, health={:?}",
        stats.total_questions, stats.health
    );
    for a in stats.areas {
        println!(
            "{:<40} {:>5}/{:<5} {:>3}%",
            a.area, a.count, a.target, a.progress_pct
        );
    }
    Ok(())
}

async fn reset(pool: &SqlitePool) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    for table in [
        "questions",
        "generation_area_progress",
        "generation_progress",
        "generation_jobs",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    println!("reset OK");
    Ok(())
}
