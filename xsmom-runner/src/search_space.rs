//! Hyperparameter search space and the trial parameter set.

use rand::Rng;
use serde::{Deserialize, Serialize};

use xsmom_core::{EngineError, SignalMode};

use crate::config::TrialOverrides;

/// One sampled point of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialParams {
    pub window: usize,
    pub skip: usize,
    pub clip: Option<f64>,
    pub trade_percent: f64,
    pub gross_target: f64,
    pub hold_period: usize,
    pub strategy: SignalMode,
}

impl TrialParams {
    /// Config overrides that substitute this point into a base configuration.
    pub fn overrides(&self) -> TrialOverrides {
        TrialOverrides {
            window: Some(self.window as i64),
            skip: Some(self.skip as i64),
            clip: Some(self.clip),
            alpha: None,
            trade_percent: Some(self.trade_percent),
            gross_target: Some(self.gross_target),
            hold_period: Some(self.hold_period as i64),
        }
    }

    /// BLAKE3 identity of the parameter values, used for deduplication.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.window as u64).to_le_bytes());
        hasher.update(&(self.skip as u64).to_le_bytes());
        match self.clip {
            Some(c) => {
                hasher.update(&[1]);
                hasher.update(&c.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hasher.update(&self.trade_percent.to_le_bytes());
        hasher.update(&self.gross_target.to_le_bytes());
        hasher.update(&(self.hold_period as u64).to_le_bytes());
        hasher.update(self.strategy.as_str().as_bytes());
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }
}

/// Bounds for every tunable hyperparameter. Integer and float ranges are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub window: (usize, usize),
    pub skip: Vec<usize>,
    pub clip: Vec<Option<f64>>,
    pub trade_percent: (f64, f64),
    pub gross_target: (f64, f64),
    pub hold_period: (usize, usize),
    pub strategies: Vec<SignalMode>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            window: (5, 250),
            skip: vec![1, 2],
            clip: vec![None, Some(2.5), Some(3.0)],
            trade_percent: (0.1, 0.3),
            gross_target: (1.0, 1.5),
            hold_period: (5, 250),
            strategies: SignalMode::ALL.to_vec(),
        }
    }
}

impl SearchSpace {
    /// Restrict the search to a single signal mode.
    pub fn with_strategy(mut self, mode: SignalMode) -> Self {
        self.strategies = vec![mode];
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let bad = |msg: String| -> Result<(), EngineError> {
            Err(EngineError::InvalidParameter(msg))
        };
        if self.window.0 == 0 || self.window.0 > self.window.1 {
            return bad(format!("window range {:?} must satisfy 1 <= lo <= hi", self.window));
        }
        if self.hold_period.0 == 0 || self.hold_period.0 > self.hold_period.1 {
            return bad(format!(
                "hold_period range {:?} must satisfy 1 <= lo <= hi",
                self.hold_period
            ));
        }
        let (tp_lo, tp_hi) = self.trade_percent;
        if !(tp_lo > 0.0 && tp_lo <= tp_hi && tp_hi < 0.5) {
            return bad(format!(
                "trade_percent range {:?} must lie inside (0, 0.5)",
                self.trade_percent
            ));
        }
        let (g_lo, g_hi) = self.gross_target;
        if !(g_lo > 0.0 && g_lo <= g_hi && g_hi.is_finite()) {
            return bad(format!(
                "gross_target range {:?} must be positive",
                self.gross_target
            ));
        }
        if self.skip.is_empty() || self.clip.is_empty() || self.strategies.is_empty() {
            return bad("skip, clip and strategy choices must not be empty".into());
        }
        if let Some(c) = self.clip.iter().flatten().find(|c| !(**c > 0.0)) {
            return bad(format!("clip choice {c} must be positive"));
        }
        Ok(())
    }

    /// Uniform draw over every dimension.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TrialParams {
        TrialParams {
            window: rng.gen_range(self.window.0..=self.window.1),
            skip: pick(&self.skip, rng),
            clip: pick(&self.clip, rng),
            trade_percent: uniform(self.trade_percent, rng),
            gross_target: uniform(self.gross_target, rng),
            hold_period: rng.gen_range(self.hold_period.0..=self.hold_period.1),
            strategy: pick(&self.strategies, rng),
        }
    }

    /// Jitter `base` by up to `jitter` of each range; categorical choices are
    /// resampled with probability `jitter`. Results stay inside the bounds.
    pub fn perturb<R: Rng + ?Sized>(
        &self,
        base: &TrialParams,
        jitter: f64,
        rng: &mut R,
    ) -> TrialParams {
        let jitter = jitter.clamp(0.0, 1.0);
        let mut next = base.clone();
        next.window = jitter_int(base.window, self.window, jitter, rng);
        next.hold_period = jitter_int(base.hold_period, self.hold_period, jitter, rng);
        next.trade_percent = jitter_float(base.trade_percent, self.trade_percent, jitter, rng);
        next.gross_target = jitter_float(base.gross_target, self.gross_target, jitter, rng);
        if rng.gen_bool(jitter) {
            next.skip = pick(&self.skip, rng);
        }
        if rng.gen_bool(jitter) {
            next.clip = pick(&self.clip, rng);
        }
        if rng.gen_bool(jitter) {
            next.strategy = pick(&self.strategies, rng);
        }
        next
    }
}

/// `choices` must be non-empty (checked by `SearchSpace::validate`).
fn pick<T: Copy, R: Rng + ?Sized>(choices: &[T], rng: &mut R) -> T {
    choices[rng.gen_range(0..choices.len())]
}

fn uniform<R: Rng + ?Sized>((lo, hi): (f64, f64), rng: &mut R) -> f64 {
    if lo >= hi {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

fn jitter_int<R: Rng + ?Sized>(base: usize, (lo, hi): (usize, usize), jitter: f64, rng: &mut R) -> usize {
    let span = (hi - lo) as f64 * jitter;
    let step = (rng.gen_range(-1.0..=1.0) * span).round() as i64;
    (base as i64 + step).clamp(lo as i64, hi as i64) as usize
}

fn jitter_float<R: Rng + ?Sized>(base: f64, (lo, hi): (f64, f64), jitter: f64, rng: &mut R) -> f64 {
    let span = (hi - lo) * jitter;
    (base + rng.gen_range(-1.0..=1.0) * span).clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xsmom_core::RngHierarchy;

    fn in_bounds(space: &SearchSpace, p: &TrialParams) -> bool {
        (space.window.0..=space.window.1).contains(&p.window)
            && space.skip.contains(&p.skip)
            && space.clip.contains(&p.clip)
            && (space.trade_percent.0..=space.trade_percent.1).contains(&p.trade_percent)
            && (space.gross_target.0..=space.gross_target.1).contains(&p.gross_target)
            && (space.hold_period.0..=space.hold_period.1).contains(&p.hold_period)
            && space.strategies.contains(&p.strategy)
    }

    #[test]
    fn default_space_is_valid() {
        let space = SearchSpace::default();
        assert!(space.validate().is_ok());
        assert_eq!(space.window, (5, 250));
        assert_eq!(space.strategies.len(), 3);
    }

    #[test]
    fn samples_and_perturbations_stay_in_bounds() {
        let space = SearchSpace::default();
        let mut rng = RngHierarchy::new(3).rng_for("test", 0);
        for _ in 0..500 {
            let p = space.sample(&mut rng);
            assert!(in_bounds(&space, &p), "{p:?}");
            let q = space.perturb(&p, 0.3, &mut rng);
            assert!(in_bounds(&space, &q), "{q:?}");
        }
    }

    #[test]
    fn zero_jitter_is_identity() {
        let space = SearchSpace::default();
        let mut rng = RngHierarchy::new(3).rng_for("test", 1);
        let p = space.sample(&mut rng);
        assert_eq!(space.perturb(&p, 0.0, &mut rng), p);
    }

    #[test]
    fn invalid_spaces_rejected() {
        let mut s = SearchSpace::default();
        s.window = (0, 10);
        assert!(s.validate().is_err());

        let mut s = SearchSpace::default();
        s.trade_percent = (0.3, 0.6);
        assert!(s.validate().is_err());

        let mut s = SearchSpace::default();
        s.hold_period = (20, 10);
        assert!(s.validate().is_err());

        let mut s = SearchSpace::default();
        s.clip = vec![Some(-1.0)];
        assert!(s.validate().is_err());

        let s = SearchSpace {
            strategies: vec![],
            ..SearchSpace::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn fingerprint_distinguishes_params() {
        let space = SearchSpace::default();
        let mut rng = RngHierarchy::new(11).rng_for("test", 0);
        let p = space.sample(&mut rng);
        let mut q = p.clone();
        assert_eq!(p.fingerprint(), q.fingerprint());
        q.clip = if p.clip.is_some() { None } else { Some(2.5) };
        assert_ne!(p.fingerprint(), q.fingerprint());
    }

    #[test]
    fn overrides_carry_every_field() {
        let p = TrialParams {
            window: 30,
            skip: 2,
            clip: None,
            trade_percent: 0.2,
            gross_target: 1.2,
            hold_period: 10,
            strategy: SignalMode::Linear,
        };
        let o = p.overrides();
        assert_eq!(o.window, Some(30));
        assert_eq!(o.clip, Some(None));
        assert_eq!(o.hold_period, Some(10));
    }

    #[test]
    fn single_strategy_restriction() {
        let space = SearchSpace::default().with_strategy(SignalMode::Exponential);
        let mut rng = RngHierarchy::new(5).rng_for("test", 0);
        for _ in 0..20 {
            assert_eq!(space.sample(&mut rng).strategy, SignalMode::Exponential);
        }
    }
}
