//! Research configuration loaded from TOML.
//!
//! ```toml
//! [data]
//! db_path = "data/futures.db"
//! table = "AdjustedFuturesDaily"
//!
//! [factor]
//! window = 20
//! skip = 1
//! clip = 3.0
//!
//! [trade]
//! trade_percent = 0.2
//! gross_target = 1.0
//! hold_period = 5
//! ```
//!
//! Integer fields are read as signed so that a negative window in a file is
//! reported as an invalid parameter rather than a parse failure.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use xsmom_core::{EngineError, SignalMode, SignalParameters, TradeParameters};

pub const DEFAULT_TABLE: &str = "AdjustedFuturesDaily";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] EngineError),
}

/// Where prices come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    /// SQLite database holding the adjusted daily table.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_table")]
    pub table: String,
    /// Long-format CSV (`date,instrument,adjclose`), used when no database is set.
    #[serde(default)]
    pub csv_path: Option<PathBuf>,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            db_path: None,
            table: default_table(),
            csv_path: None,
        }
    }
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSection {
    pub window: i64,
    #[serde(default = "default_skip")]
    pub skip: i64,
    #[serde(default)]
    pub clip: Option<f64>,
    #[serde(default)]
    pub alpha: Option<f64>,
}

fn default_skip() -> i64 {
    SignalParameters::DEFAULT_SKIP as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSection {
    pub trade_percent: f64,
    pub gross_target: f64,
    #[serde(default = "default_hold")]
    pub hold_period: i64,
}

fn default_hold() -> i64 {
    1
}

/// Full research configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub data: DataSection,
    pub factor: FactorSection,
    pub trade: TradeSection,
}

/// Per-trial replacements for factor and trade fields. `None` keeps the base value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialOverrides {
    pub window: Option<i64>,
    pub skip: Option<i64>,
    /// `Some(None)` removes clipping.
    pub clip: Option<Option<f64>>,
    pub alpha: Option<f64>,
    pub trade_percent: Option<f64>,
    pub gross_target: Option<f64>,
    pub hold_period: Option<i64>,
}

impl TrialOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl ResearchConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every signal mode and the trade section convert cleanly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for mode in SignalMode::ALL {
            self.signal_params(mode)?;
        }
        self.trade_params()?;
        Ok(())
    }

    pub fn signal_params(&self, mode: SignalMode) -> Result<SignalParameters, ConfigError> {
        let f = &self.factor;
        if f.window <= 0 {
            return Err(invalid(format!("'window' must be positive, got {}", f.window)));
        }
        if f.skip < 0 {
            return Err(invalid(format!("'skip' must be non-negative, got {}", f.skip)));
        }
        let params = SignalParameters::new(f.window as usize, mode)
            .with_skip(f.skip as usize)
            .with_clip(f.clip)
            .with_alpha(f.alpha.unwrap_or(SignalParameters::DEFAULT_ALPHA));
        params.validate()?;
        Ok(params)
    }

    pub fn trade_params(&self) -> Result<TradeParameters, ConfigError> {
        let t = &self.trade;
        if t.hold_period <= 0 {
            return Err(invalid(format!(
                "'hold_period' must be positive, got {}",
                t.hold_period
            )));
        }
        Ok(TradeParameters::new(
            t.trade_percent,
            t.gross_target,
            t.hold_period as usize,
        )?)
    }

    /// A copy with `overrides` applied. The receiver is untouched.
    pub fn apply_overrides(&self, overrides: &TrialOverrides) -> Self {
        let mut next = self.clone();
        let (f, t) = (&mut next.factor, &mut next.trade);
        if let Some(window) = overrides.window {
            f.window = window;
        }
        if let Some(skip) = overrides.skip {
            f.skip = skip;
        }
        if let Some(clip) = overrides.clip {
            f.clip = clip;
        }
        if let Some(alpha) = overrides.alpha {
            f.alpha = Some(alpha);
        }
        if let Some(tp) = overrides.trade_percent {
            t.trade_percent = tp;
        }
        if let Some(gross) = overrides.gross_target {
            t.gross_target = gross;
        }
        if let Some(hold) = overrides.hold_period {
            t.hold_period = hold;
        }
        next
    }

    /// Starter document written by `xsmom init-config`.
    pub fn template() -> String {
        format!(
            r#"# xsmom research configuration

[data]
# SQLite database with an adjusted daily futures table.
db_path = "data/futures.db"
table = "{DEFAULT_TABLE}"
# csv_path = "data/prices.csv"   # long format: date,instrument,adjclose

[factor]
window = 20
skip = 1
# clip = 3.0
# alpha = 0.2                    # exponential mode only

[trade]
trade_percent = 0.2
gross_target = 1.0
hold_period = 5
"#
        )
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(EngineError::InvalidParameter(msg))
}
