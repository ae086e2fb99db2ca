use std::time::Duration;

use crate::generation::cost::CostModel;
use crate::generation::distribution::AreaWeights;

// Config is the one place runtime settings come from.
// Everything is read from the environment (optionally via .env) into typed fields.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub db_max_connections: u32,
    pub generator_url: String,
    pub generation: GenerationConfig,
}

/// Knobs of the generation job controller.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub weights: AreaWeights,
    pub cost: CostModel,
    /// Upper bound on a single generator call.
    pub generator_timeout: Duration,
    /// Generator calls allowed per requested question of an area.
    pub attempts_per_question: u32,
    /// Consecutive timeouts tolerated before the job is failed.
    pub max_consecutive_timeouts: u32,
    /// Similarity at or above which a candidate counts as a duplicate.
    pub dedup_threshold: f64,
    /// Recent question stems sent to the generator as an avoid-list.
    pub avoid_hint_limit: i64,
    /// A processing job whose progress row is older than this has lost its
    /// runner. Must outlast one generator call.
    pub orphan_after: Duration,
    /// How often the service sweeps for orphaned jobs.
    pub reap_interval: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            weights: AreaWeights::bcba_default(),
            cost: CostModel::default(),
            generator_timeout: Duration::from_secs(90),
            attempts_per_question: 3,
            max_consecutive_timeouts: 5,
            dedup_threshold: 0.85,
            avoid_hint_limit: 30,
            orphan_after: Duration::from_secs(90 * 2 + 30),
            reap_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or_fallback("QUIZGEN_DATABASE_URL", "DATABASE_URL")
            .unwrap_or_else(|| "sqlite://data/quizgen.db".to_string());

        let admin_addr = env_or_fallback("QUIZGEN_ADMIN_ADDR", "ADMIN_ADDR")
            .or_else(|| Some("127.0.0.1:8080".to_string()))
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("QUIZGEN_MIGRATE_ON_STARTUP").unwrap_or(true);

        let db_max_connections = env_parse("QUIZGEN_DB_MAX_CONNECTIONS")
            .unwrap_or(4u32)
            .clamp(1, 32);

        let generator_url = env_or_fallback("QUIZGEN_GENERATOR_URL", "GENERATOR_URL")
            .ok_or_else(|| anyhow::anyhow!("QUIZGEN_GENERATOR_URL is missing"))?;

        let generation = GenerationConfig::from_env()?;

        Ok(Self {
            database_url,
            admin_addr,
            migrate_on_startup,
            db_max_connections,
            generator_url,
            generation,
        })
    }
}

impl GenerationConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let weights = match env_or_fallback("QUIZGEN_AREA_WEIGHTS", "AREA_WEIGHTS") {
            Some(raw) => AreaWeights::from_json(&raw)
                .map_err(|e| anyhow::anyhow!("QUIZGEN_AREA_WEIGHTS: {e}"))?,
            None => defaults.weights,
        };

        let cost = CostModel {
            per_question: env_parse("QUIZGEN_COST_PER_QUESTION")
                .unwrap_or(defaults.cost.per_question),
            per_dedup_check: env_parse("QUIZGEN_COST_PER_DEDUP_CHECK")
                .unwrap_or(defaults.cost.per_dedup_check),
            dedup_checks_per_question: env_parse("QUIZGEN_DEDUP_CHECKS_PER_QUESTION")
                .unwrap_or(defaults.cost.dedup_checks_per_question),
        };

        let generator_timeout = env_parse::<u64>("QUIZGEN_GENERATOR_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.generator_timeout);

        let attempts_per_question = env_parse("QUIZGEN_ATTEMPTS_PER_QUESTION")
            .unwrap_or(defaults.attempts_per_question)
            .max(1);

        let max_consecutive_timeouts = env_parse("QUIZGEN_MAX_CONSECUTIVE_TIMEOUTS")
            .unwrap_or(defaults.max_consecutive_timeouts);

        let dedup_threshold: f64 =
            env_parse("QUIZGEN_DEDUP_THRESHOLD").unwrap_or(defaults.dedup_threshold);
        if !(0.0..=1.0).contains(&dedup_threshold) {
            anyhow::bail!("QUIZGEN_DEDUP_THRESHOLD must be within [0, 1], got {dedup_threshold}");
        }

        let avoid_hint_limit = env_parse("QUIZGEN_AVOID_HINT_LIMIT")
            .unwrap_or(defaults.avoid_hint_limit)
            .clamp(0, 200);

        let orphan_after = env_parse::<u64>("QUIZGEN_ORPHAN_AFTER_SECS")
            .map(Duration::from_secs)
            .unwrap_or(generator_timeout * 2 + Duration::from_secs(30));
        if orphan_after <= generator_timeout {
            anyhow::bail!(
                "QUIZGEN_ORPHAN_AFTER_SECS ({}s) must exceed the generator timeout ({}ms)",
                orphan_after.as_secs(),
                generator_timeout.as_millis()
            );
        }

        let reap_interval = env_parse::<u64>("QUIZGEN_REAP_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.reap_interval)
            .max(Duration::from_secs(1));

        Ok(Self {
            weights,
            cost,
            generator_timeout,
            attempts_per_question,
            max_consecutive_timeouts,
            dedup_threshold,
            avoid_hint_limit,
            orphan_after,
            reap_interval,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
