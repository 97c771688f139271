//! Strategy parameter structs passed explicitly into each stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// How the momentum signal weights past returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    /// Lagged log-return over the lookback window.
    #[default]
    Simple,
    /// Linearly decaying weights, most recent return weighted highest.
    Linear,
    /// Exponentially weighted moving average of daily log returns.
    Exponential,
}

impl SignalMode {
    pub const ALL: [SignalMode; 3] = [Self::Simple, Self::Linear, Self::Exponential];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Linear => "linear",
            Self::Exponential => "exponential",
        }
    }
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "linear" => Ok(Self::Linear),
            "exponential" | "ewm" => Ok(Self::Exponential),
            other => Err(EngineError::invalid(format!(
                "unknown signal mode '{other}', choose simple, linear or exponential"
            ))),
        }
    }
}

/// Momentum signal configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalParameters {
    /// Lookback window in trading days.
    pub window: usize,
    /// Days skipped between the end of the lookback and the decision date.
    pub skip: usize,
    /// Symmetric truncation bound for signal values.
    pub clip: Option<f64>,
    pub mode: SignalMode,
    /// Decay for exponential mode; weight of the most recent return.
    pub alpha: f64,
}

impl SignalParameters {
    pub const DEFAULT_SKIP: usize = 1;
    pub const DEFAULT_ALPHA: f64 = 0.2;

    pub fn new(window: usize, mode: SignalMode) -> Self {
        Self {
            window,
            skip: Self::DEFAULT_SKIP,
            clip: None,
            mode,
            alpha: Self::DEFAULT_ALPHA,
        }
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_clip(mut self, clip: Option<f64>) -> Self {
        self.clip = clip;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Rows at the top of the signal that lack enough history and stay unknown.
    pub fn warmup_rows(&self) -> usize {
        self.window + self.skip
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window == 0 {
            return Err(EngineError::invalid("'window' must be positive"));
        }
        if let Some(clip) = self.clip {
            if !(clip > 0.0) {
                return Err(EngineError::invalid(format!(
                    "'clip' must be positive if provided, got {clip}"
                )));
            }
        }
        if self.mode == SignalMode::Exponential && !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(EngineError::invalid(format!(
                "'alpha' must be in (0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// Position construction configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeParameters {
    /// Fraction of the cross-section taken long and short; in (0, 0.5).
    pub trade_percent: f64,
    /// Target sum of absolute weights per date.
    pub gross_target: f64,
    /// Trailing smoothing window for positions, in days.
    pub hold_period: usize,
}

impl TradeParameters {
    /// Build and validate.
    pub fn new(
        trade_percent: f64,
        gross_target: f64,
        hold_period: usize,
    ) -> Result<Self, EngineError> {
        let params = Self {
            trade_percent,
            gross_target,
            hold_period,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.trade_percent > 0.0 && self.trade_percent < 0.5) {
            return Err(EngineError::invalid(format!(
                "'trade_percent' must be in (0, 0.5), got {}",
                self.trade_percent
            )));
        }
        if !(self.gross_target > 0.0 && self.gross_target.is_finite()) {
            return Err(EngineError::invalid(format!(
                "'gross_target' must be positive, got {}",
                self.gross_target
            )));
        }
        if self.hold_period == 0 {
            return Err(EngineError::invalid("'hold_period' must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Linear".parse::<SignalMode>().unwrap(), SignalMode::Linear);
        assert_eq!("ewm".parse::<SignalMode>().unwrap(), SignalMode::Exponential);
        assert!(matches!(
            "quadratic".parse::<SignalMode>(),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn mode_serializes_lowercase() {
        let json = serde_json::to_string(&SignalMode::Exponential).unwrap();
        assert_eq!(json, "\"exponential\"");
    }

    #[test]
    fn signal_defaults() {
        let p = SignalParameters::new(20, SignalMode::Simple);
        assert_eq!(p.skip, 1);
        assert_eq!(p.clip, None);
        assert_eq!(p.warmup_rows(), 21);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn signal_rejects_zero_window_and_bad_clip() {
        assert!(SignalParameters::new(0, SignalMode::Simple).validate().is_err());
        let p = SignalParameters::new(5, SignalMode::Simple).with_clip(Some(0.0));
        assert!(p.validate().is_err());
        let p = SignalParameters::new(5, SignalMode::Simple).with_clip(Some(f64::NAN));
        assert!(p.validate().is_err());
    }

    #[test]
    fn alpha_checked_only_for_exponential() {
        let p = SignalParameters::new(5, SignalMode::Exponential).with_alpha(1.5);
        assert!(p.validate().is_err());
        let p = SignalParameters::new(5, SignalMode::Simple).with_alpha(1.5);
        assert!(p.validate().is_ok());
        let p = SignalParameters::new(5, SignalMode::Exponential).with_alpha(1.0);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn trade_parameter_bounds() {
        assert!(TradeParameters::new(0.2, 1.0, 1).is_ok());
        assert!(TradeParameters::new(0.0, 1.0, 1).is_err());
        assert!(TradeParameters::new(0.5, 1.0, 1).is_err());
        assert!(TradeParameters::new(0.2, 0.0, 1).is_err());
        assert!(TradeParameters::new(0.2, -1.0, 1).is_err());
        assert!(TradeParameters::new(0.2, 1.0, 0).is_err());
    }
}
