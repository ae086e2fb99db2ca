use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::WeightsError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Area -> weight table that drives how a job's quota is split.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaWeights {
    weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaAllocation {
    pub area: String,
    pub weight: f64,
    pub quota: u32,
}

impl AreaWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Result<Self, WeightsError> {
        if weights.is_empty() {
            return Err(WeightsError::Empty);
        }
        if let Some((area, weight)) = weights.iter().find(|(_, w)| !(w.is_finite() && **w > 0.0)) {
            return Err(WeightsError::NonPositive {
                area: area.clone(),
                weight: *weight,
            });
        }
        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(WeightsError::BadSum(sum));
        }
        Ok(Self { weights })
    }

    pub fn from_json(raw: &str) -> Result<Self, WeightsError> {
        let weights: BTreeMap<String, f64> = serde_json::from_str(raw)?;
        Self::new(weights)
    }

    /// BCBA 5th edition task list weighting.
    pub fn bcba_default() -> Self {
        let table = [
            ("Ethics", 0.13),
            ("Behavior-Change Procedures", 0.14),
            ("Concepts and Principles", 0.14),
            ("Behavior Assessment", 0.13),
            ("Selecting and Implementing Interventions", 0.11),
            ("Personnel Supervision and Management", 0.11),
            ("Measurement, Data Display, and Interpretation", 0.12),
            ("Experimental Design", 0.07),
            ("Philosophical Underpinnings", 0.05),
        ];
        Self {
            weights: table
                .into_iter()
                .map(|(area, w)| (area.to_string(), w))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn contains(&self, area: &str) -> bool {
        self.weights.contains_key(area)
    }

    pub fn weight(&self, area: &str) -> Option<f64> {
        self.weights.get(area).copied()
    }

    pub fn areas(&self) -> Vec<String> {
        self.weights.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(a, w)| (a.as_str(), *w))
    }

    /// Known areas of `areas`, heaviest first, ties by name.
    fn ordered(&self, areas: &[String]) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = areas
            .iter()
            .filter_map(|a| self.weight(a).map(|w| (a.clone(), w)))
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out.dedup_by(|a, b| a.0 == b.0);
        out
    }

    /// Splits `count` over `areas` proportionally to their weights.
    ///
    /// Weights are renormalized over the selection. Quotas always sum to
    /// exactly `count`: the rounding shortfall goes to the heaviest area and
    /// any overshoot is taken back starting from the heaviest area.
    /// Unknown areas are ignored; the result is ordered heaviest first.
    pub fn distribute(&self, count: u32, areas: &[String]) -> Vec<AreaAllocation> {
        let ordered = self.ordered(areas);
        let total_weight: f64 = ordered.iter().map(|(_, w)| w).sum();

        let mut allocations: Vec<AreaAllocation> = ordered
            .into_iter()
            .map(|(area, weight)| {
                let share = weight / total_weight;
                AreaAllocation {
                    area,
                    weight,
                    quota: (count as f64 * share).round() as u32,
                }
            })
            .collect();

        if allocations.is_empty() {
            return allocations;
        }

        let assigned: u32 = allocations.iter().map(|a| a.quota).sum();
        if assigned < count {
            allocations[0].quota += count - assigned;
        } else {
            let mut surplus = assigned - count;
            for alloc in allocations.iter_mut() {
                if surplus == 0 {
                    break;
                }
                let take = alloc.quota.min(surplus);
                alloc.quota -= take;
                surplus -= take;
            }
        }

        allocations
    }
}
