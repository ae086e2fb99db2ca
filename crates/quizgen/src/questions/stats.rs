use serde::Serialize;
use std::collections::HashMap;

use crate::generation::distribution::AreaWeights;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Empty,
    Critical,
    Warning,
    Healthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct AreaPoolStat {
    pub area: String,
    pub count: i64,
    pub weight: f64,
    pub target: i64,
    pub progress_pct: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_questions: i64,
    pub health: PoolHealth,
    pub areas: Vec<AreaPoolStat>,
}

impl PoolStats {
    /// Targets are `round(total * weight)`; health is judged on the
    /// worst-covered area (below 50% critical, below 90% warning).
    pub fn from_counts(counts: &[(String, i64)], weights: &AreaWeights) -> Self {
        let by_area: HashMap<&str, i64> = counts.iter().map(|(a, c)| (a.as_str(), *c)).collect();
        let total_questions: i64 = counts.iter().map(|(_, c)| c).sum();

        let areas: Vec<AreaPoolStat> = weights
            .iter()
            .map(|(area, weight)| {
                let count = by_area.get(area).copied().unwrap_or(0);
                let target = (total_questions as f64 * weight).round() as i64;
                let progress_pct = if target > 0 {
                    ((count * 100) / target).min(100)
                } else {
                    0
                };
                AreaPoolStat {
                    area: area.to_string(),
                    count,
                    weight,
                    target,
                    progress_pct,
                }
            })
            .collect();

        let health = if total_questions == 0 {
            PoolHealth::Empty
        } else {
            let worst = areas
                .iter()
                .filter(|a| a.target > 0)
                .map(|a| a.count as f64 / a.target as f64)
                .fold(f64::INFINITY, f64::min);
            if worst < 0.5 {
                PoolHealth::Critical
            } else if worst < 0.9 {
                PoolHealth::Warning
            } else {
                PoolHealth::Healthy
            }
        };

        Self {
            total_questions,
            health,
            areas,
        }
    }
}
