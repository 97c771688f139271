//! Trial scoring policies.
//!
//! Two interchangeable policies turn a trial's metrics into a scalar score:
//! - `HardPrune`: score is the Sharpe ratio; trials below `min_sharpe` are pruned.
//! - `SoftPenalty`: Sharpe minus weighted shortfalls versus target thresholds.
//!   Never prunes.
//!
//! Undefined (`NaN`) scores rank below every finite score.

use serde::{Deserialize, Serialize};
use xsmom_core::PerformanceMetrics;

/// Targets and weights for the soft-penalty score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyWeights {
    pub target_sharpe: f64,
    pub sharpe_weight: f64,
    pub target_return: f64,
    pub return_weight: f64,
    /// Largest tolerated drawdown magnitude (positive fraction).
    pub max_drawdown: f64,
    pub drawdown_weight: f64,
    pub max_turnover: f64,
    pub turnover_weight: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            target_sharpe: 1.0,
            sharpe_weight: 5.0,
            target_return: 0.05,
            return_weight: 50.0,
            max_drawdown: 0.2,
            drawdown_weight: 10.0,
            max_turnover: 0.5,
            turnover_weight: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ScoringPolicy {
    HardPrune { min_sharpe: f64 },
    SoftPenalty(PenaltyWeights),
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::SoftPenalty(PenaltyWeights::default())
    }
}

/// Result of scoring one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub score: f64,
    /// The trial is abandoned: its score must not feed the search model.
    pub pruned: bool,
}

impl ScoringPolicy {
    pub fn score(&self, m: &PerformanceMetrics) -> Scored {
        match self {
            Self::HardPrune { min_sharpe } => Scored {
                score: m.sharpe,
                pruned: !(m.sharpe >= *min_sharpe),
            },
            Self::SoftPenalty(w) => Scored {
                score: soft_penalty_score(m, w),
                pruned: false,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::HardPrune { .. } => "hard_prune",
            Self::SoftPenalty(_) => "soft_penalty",
        }
    }
}

/// Sharpe minus weighted shortfalls on Sharpe, return, drawdown and turnover.
pub fn soft_penalty_score(m: &PerformanceMetrics, w: &PenaltyWeights) -> f64 {
    let mut score = m.sharpe;
    if m.sharpe < w.target_sharpe {
        score -= (w.target_sharpe - m.sharpe) * w.sharpe_weight;
    }
    if m.ann_return < w.target_return {
        score -= (w.target_return - m.ann_return) * w.return_weight;
    }
    let drawdown = m.max_dd.abs();
    if drawdown > w.max_drawdown {
        score -= (drawdown - w.max_drawdown) * w.drawdown_weight;
    }
    if m.turnover > w.max_turnover {
        score -= (m.turnover - w.max_turnover) * w.turnover_weight;
    }
    score
}

/// Sort key treating `NaN` as the worst possible score.
pub fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Whether `a` strictly outranks `b`.
pub fn is_better(a: f64, b: f64) -> bool {
    rank_key(a) > rank_key(b)
}
