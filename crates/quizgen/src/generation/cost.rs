use serde::{Deserialize, Serialize};

/// Per-item cost constants, in dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub per_question: f64,
    pub per_dedup_check: f64,
    pub dedup_checks_per_question: u32,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            per_question: 0.09,
            per_dedup_check: 0.002,
            dedup_checks_per_question: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub with_dedup: f64,
    pub without_dedup: f64,
}

impl CostModel {
    pub fn dedup_cost_per_question(&self) -> f64 {
        self.per_dedup_check * self.dedup_checks_per_question as f64
    }

    /// Cost added to the running estimate for one accepted question.
    pub fn marginal_cost(&self, skip_dedup: bool) -> f64 {
        if skip_dedup {
            self.per_question
        } else {
            self.per_question + self.dedup_cost_per_question()
        }
    }

    pub fn estimate(&self, count: u32) -> CostEstimate {
        let count = count as f64;
        CostEstimate {
            with_dedup: round_cents(count * (self.per_question + self.dedup_cost_per_question())),
            without_dedup: round_cents(count * self.per_question),
        }
    }
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
