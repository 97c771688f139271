//! Strict acceptance filter applied to the optimizer's best trial.
//!
//! Thresholds are inclusive. An undefined metric fails its threshold.

use serde::{Deserialize, Serialize};
use std::fmt;
use xsmom_core::PerformanceMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    pub min_sharpe: f64,
    pub min_ann_return: f64,
    /// Largest tolerated drawdown magnitude (positive fraction).
    pub max_drawdown: f64,
    pub max_turnover: f64,
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self {
            min_sharpe: 1.0,
            min_ann_return: 0.05,
            max_drawdown: 0.2,
            max_turnover: 0.5,
        }
    }
}

/// One failed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum Violation {
    Sharpe { value: f64, min: f64 },
    AnnReturn { value: f64, min: f64 },
    Drawdown { value: f64, max: f64 },
    Turnover { value: f64, max: f64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sharpe { value, min } => write!(f, "sharpe {value:.3} < {min}"),
            Self::AnnReturn { value, min } => write!(f, "ann_return {value:.4} < {min}"),
            Self::Drawdown { value, max } => write!(f, "|max_dd| {value:.4} > {max}"),
            Self::Turnover { value, max } => write!(f, "turnover {value:.4} > {max}"),
        }
    }
}

impl AcceptanceCriteria {
    /// Every threshold `m` fails. Empty means accepted.
    pub fn check(&self, m: &PerformanceMetrics) -> Vec<Violation> {
        let mut out = Vec::new();
        if !(m.sharpe >= self.min_sharpe) {
            out.push(Violation::Sharpe {
                value: m.sharpe,
                min: self.min_sharpe,
            });
        }
        if !(m.ann_return >= self.min_ann_return) {
            out.push(Violation::AnnReturn {
                value: m.ann_return,
                min: self.min_ann_return,
            });
        }
        let dd = m.max_dd.abs();
        if !(dd <= self.max_drawdown) {
            out.push(Violation::Drawdown {
                value: dd,
                max: self.max_drawdown,
            });
        }
        if !(m.turnover <= self.max_turnover) {
            out.push(Violation::Turnover {
                value: m.turnover,
                max: self.max_turnover,
            });
        }
        out
    }

    pub fn accepts(&self, m: &PerformanceMetrics) -> bool {
        self.check(m).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sharpe: f64, ann_return: f64, max_dd: f64, turnover: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            sharpe,
            ann_return,
            ann_vol: 0.1,
            max_dd,
            calmar: f64::NAN,
            pot: 0.0,
            turnover,
            total_pnl: 0.0,
            n_days: 252,
        }
    }

    #[test]
    fn boundary_values_are_accepted() {
        let c = AcceptanceCriteria::default();
        assert!(c.accepts(&metrics(1.0, 0.05, -0.2, 0.5)));
    }

    #[test]
    fn each_threshold_reported() {
        let c = AcceptanceCriteria::default();
        let v = c.check(&metrics(0.8, 0.01, -0.35, 0.9));
        assert_eq!(v.len(), 4);
        assert!(matches!(v[0], Violation::Sharpe { .. }));
        assert!(matches!(v[2], Violation::Drawdown { value, .. } if (value - 0.35).abs() < 1e-12));
    }

    #[test]
    fn undefined_sharpe_fails() {
        let c = AcceptanceCriteria::default();
        let v = c.check(&metrics(f64::NAN, 0.1, -0.1, 0.1));
        assert_eq!(v.len(), 1);
        assert!(v[0].to_string().starts_with("sharpe NaN"));
    }
}
