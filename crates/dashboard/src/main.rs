use std::sync::Arc;

use quizgen::api;
use quizgen::config;
use quizgen::db;
use quizgen::generation::{GenerationController, HttpQuestionGenerator};
use quizgen::telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info,sqlx=warn");

    let cfg = config::Config::from_env()?;
    let api_addr = cfg.admin_addr.clone();

    info!(
        api = %api_addr.as_deref().unwrap_or("disabled"),
        generator = %cfg.generator_url,
        migrate_on_startup = cfg.migrate_on_startup,
        areas = cfg.generation.weights.len(),
        generator_timeout_ms = cfg.generation.generator_timeout.as_millis() as u64,
        orphan_after_secs = cfg.generation.orphan_after.as_secs(),
        reap_interval_secs = cfg.generation.reap_interval.as_secs(),
        "quizgen dashboard starting"
    );

    let pool = db::make_pool(&cfg.database_url, cfg.db_max_connections).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let generator = Arc::new(HttpQuestionGenerator::new(&cfg.generator_url)?);
    let controller = GenerationController::new(pool.clone(), generator, cfg.generation.clone());

    let recovered = controller.recover().await?;
    info!(
        failed = recovered.failed,
        cancelled = recovered.cancelled,
        resumed = recovered.resumed.len(),
        "startup reconciliation done"
    );

    // ---- Reaper task ----
    // Finalizes jobs whose runner died in any instance sharing this database.
    let reaper_handle = {
        let controller = controller.clone();
        let every = cfg.generation.reap_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                // reap_orphans logs what it finalized
                if let Err(e) = controller.reap_orphans().await {
                    error!(error = %e, "orphan reaping failed");
                }
            }
        })
    };

    // ---- API task ----
    let app = api::router(api::ApiState { controller });

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("admin api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = api_handle => {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "admin api stopped");
                    return Err(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            // running jobs are left in `processing`; a reaper finalizes them
            // once their heartbeat goes stale
            info!("shutdown signal received");
        }
    }

    reaper_handle.abort();

    pool.close().await;
    Ok(())
}
