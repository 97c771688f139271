//! Hyperparameter search over the research pipeline.
//!
//! Trials are proposed by a seeded `SearchModel`, evaluated in batches (in
//! parallel on a rayon pool when `threads > 1`), scored by a `ScoringPolicy`,
//! and folded back in trial-index order. Each trial draws from its own RNG
//! stream `(master_seed, "trial", index)` and the model only changes between
//! batches, so a fixed `(seed, batch_size)` gives the same report for any
//! thread count.
//!
//! Evaluator errors, panics and timeouts become failed trials; the search
//! always runs to `n_trials`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use xsmom_core::{EngineError, PerformanceMetrics, RngHierarchy};

use crate::acceptance::{AcceptanceCriteria, Violation};
use crate::leaderboard::TrialLeaderboard;
use crate::pipeline::RunError;
use crate::scoring::{is_better, ScoringPolicy};
use crate::search_space::{SearchSpace, TrialParams};

// ─── Evaluator seam ──────────────────────────────────────────────────

/// Objective evaluated once per trial.
pub trait TrialEvaluator: Send + Sync {
    fn evaluate(&self, params: &TrialParams) -> Result<PerformanceMetrics, RunError>;
}

/// Adapts a closure into a `TrialEvaluator`.
pub struct FnEvaluator<F>(F);

impl<F> FnEvaluator<F>
where
    F: Fn(&TrialParams) -> Result<PerformanceMetrics, RunError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> TrialEvaluator for FnEvaluator<F>
where
    F: Fn(&TrialParams) -> Result<PerformanceMetrics, RunError> + Send + Sync,
{
    fn evaluate(&self, params: &TrialParams) -> Result<PerformanceMetrics, RunError> {
        (self.0)(params)
    }
}

// ─── Trial records ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrialState {
    Completed,
    /// Scored but abandoned by the scoring policy.
    Pruned,
    Failed { reason: String, timed_out: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub index: usize,
    /// Parameter fingerprint; identical params share a run id.
    pub run_id: String,
    pub params: TrialParams,
    pub metrics: Option<PerformanceMetrics>,
    pub score: f64,
    pub state: TrialState,
}

impl TrialRecord {
    pub fn is_completed(&self) -> bool {
        self.state == TrialState::Completed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, TrialState::Failed { .. })
    }
}

/// Best-so-far accumulator with a compare-and-replace contract.
#[derive(Debug, Clone, Default)]
pub struct BestTrial {
    best: Option<TrialRecord>,
}

impl BestTrial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `candidate` if nothing is held yet or it scores strictly better.
    /// Returns whether the held record changed.
    pub fn offer(&mut self, candidate: &TrialRecord) -> bool {
        let replace = match &self.best {
            None => true,
            Some(current) => is_better(candidate.score, current.score),
        };
        if replace {
            self.best = Some(candidate.clone());
        }
        replace
    }

    pub fn get(&self) -> Option<&TrialRecord> {
        self.best.as_ref()
    }

    pub fn into_inner(self) -> Option<TrialRecord> {
        self.best
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted { best: TrialRecord },
    NotAccepted {
        candidate: TrialRecord,
        violations: Vec<Violation>,
    },
    NoTrialCompleted,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

// ─── Config / report ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search setup: {0}")]
    Invalid(#[from] EngineError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub n_trials: usize,
    pub seed: u64,
    pub threads: usize,
    pub batch_size: usize,
    /// Trials sampled uniformly before the model starts exploiting.
    pub warmup_trials: usize,
    pub exploit_prob: f64,
    pub top_k: usize,
    /// Perturbation size as a fraction of each range.
    pub jitter: f64,
    pub scoring: ScoringPolicy,
    pub acceptance: AcceptanceCriteria,
    /// Per-trial wall-clock limit. Each limited trial runs on its own OS
    /// thread; a timed-out thread is detached and keeps running until the
    /// evaluation returns, so evaluators that can stall indefinitely will
    /// accumulate threads. Evaluators should bound their own work.
    pub trial_timeout: Option<Duration>,
    pub leaderboard_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_trials: 100,
            seed: 42,
            threads: 1,
            batch_size: 8,
            warmup_trials: 10,
            exploit_prob: 0.7,
            top_k: 5,
            jitter: 0.2,
            scoring: ScoringPolicy::default(),
            acceptance: AcceptanceCriteria::default(),
            trial_timeout: None,
            leaderboard_size: 20,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let bad = |msg: String| -> Result<(), EngineError> {
            Err(EngineError::InvalidParameter(msg))
        };
        if self.threads == 0 {
            return bad("threads must be at least 1".into());
        }
        if self.batch_size == 0 {
            return bad("batch_size must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.exploit_prob) {
            return bad(format!("exploit_prob {} outside [0, 1]", self.exploit_prob));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return bad(format!("jitter {} outside [0, 1]", self.jitter));
        }
        if self.trial_timeout.is_some_and(|t| t.is_zero()) {
            return bad("trial_timeout must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub trials: usize,
    pub completed: usize,
    pub pruned: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub elapsed_secs: f64,
}

/// Snapshot passed to the progress callback after each batch.
#[derive(Debug, Clone)]
pub struct SearchProgress {
    pub batch: usize,
    pub trials_done: usize,
    pub n_trials: usize,
    pub completed: usize,
    pub pruned: usize,
    pub failed: usize,
    pub best_score: Option<f64>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub verdict: Verdict,
    /// Best scored trial, pruned ones included.
    pub best_seen: Option<TrialRecord>,
    pub leaderboard: TrialLeaderboard,
    pub stats: SearchStats,
    pub trials: Vec<TrialRecord>,
}

// ─── Search model ────────────────────────────────────────────────────

/// Seeded proposal model: uniform during warmup, then either a jittered copy
/// of one of the top-k completed trials or a fresh uniform draw.
#[derive(Debug, Clone)]
pub struct SearchModel {
    space: SearchSpace,
    warmup_trials: usize,
    exploit_prob: f64,
    top_k: usize,
    jitter: f64,
    elite: Vec<(f64, usize, TrialParams)>,
}

impl SearchModel {
    pub fn new(space: SearchSpace, config: &SearchConfig) -> Self {
        Self {
            space,
            warmup_trials: config.warmup_trials,
            exploit_prob: config.exploit_prob,
            top_k: config.top_k,
            jitter: config.jitter,
            elite: Vec::new(),
        }
    }

    pub fn propose<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> TrialParams {
        if index < self.warmup_trials || self.elite.is_empty() {
            return self.space.sample(rng);
        }
        if rng.gen_bool(self.exploit_prob) {
            let (_, _, base) = &self.elite[rng.gen_range(0..self.elite.len())];
            self.space.perturb(base, self.jitter, rng)
        } else {
            self.space.sample(rng)
        }
    }

    /// Feed a finished trial back. Only completed trials with a finite score count.
    pub fn observe(&mut self, record: &TrialRecord) {
        if !record.is_completed() || !record.score.is_finite() || self.top_k == 0 {
            return;
        }
        self.elite
            .push((record.score, record.index, record.params.clone()));
        self.elite.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        self.elite.truncate(self.top_k);
    }

    pub fn elite_len(&self) -> usize {
        self.elite.len()
    }
}

// ─── Core search loop ────────────────────────────────────────────────

/// Run the search and apply the acceptance filter to its best completed trial.
pub fn search(
    evaluator: Arc<dyn TrialEvaluator>,
    space: &SearchSpace,
    config: &SearchConfig,
    progress_cb: Option<&dyn Fn(&SearchProgress)>,
) -> Result<SearchReport, SearchError> {
    space.validate()?;
    config.validate()?;

    let start_time = Instant::now();
    let rng_hierarchy = RngHierarchy::new(config.seed);
    let mut model = SearchModel::new(space.clone(), config);
    let mut leaderboard = TrialLeaderboard::new(config.leaderboard_size);
    let mut best_seen = BestTrial::new();
    let mut best_completed = BestTrial::new();
    let mut stats = SearchStats::default();
    let mut trials: Vec<TrialRecord> = Vec::with_capacity(config.n_trials);

    let thread_pool = if config.threads > 1 {
        Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .build()?,
        )
    } else {
        None
    };

    tracing::info!(
        n_trials = config.n_trials,
        threads = config.threads,
        batch_size = config.batch_size,
        scoring = config.scoring.name(),
        seed = config.seed,
        "starting search"
    );

    let mut batch = 0usize;
    let mut next_index = 0usize;
    while next_index < config.n_trials {
        let end = (next_index + config.batch_size).min(config.n_trials);

        // Model is read-only while the batch is proposed.
        let proposals: Vec<(usize, TrialParams)> = (next_index..end)
            .map(|index| {
                let mut rng = rng_hierarchy.rng_for("trial", index as u64);
                (index, model.propose(index, &mut rng))
            })
            .collect();

        let run = |(index, params): &(usize, TrialParams)| {
            run_trial(&evaluator, *index, params.clone(), config)
        };
        let records: Vec<TrialRecord> = if let Some(ref tp) = thread_pool {
            tp.install(|| proposals.par_iter().map(run).collect())
        } else {
            proposals.iter().map(run).collect()
        };

        for record in records {
            stats.trials += 1;
            match &record.state {
                TrialState::Completed => {
                    stats.completed += 1;
                    best_seen.offer(&record);
                    best_completed.offer(&record);
                }
                TrialState::Pruned => {
                    stats.pruned += 1;
                    best_seen.offer(&record);
                }
                TrialState::Failed { reason, timed_out } => {
                    stats.failed += 1;
                    if *timed_out {
                        stats.timed_out += 1;
                    }
                    tracing::warn!(trial = record.index, %reason, "trial failed");
                }
            }
            if record.metrics.is_some() {
                leaderboard.insert(record.clone());
            }
            model.observe(&record);
            tracing::debug!(
                trial = record.index,
                run_id = %record.run_id,
                score = record.score,
                "trial finished"
            );
            trials.push(record);
        }

        if let Some(cb) = progress_cb {
            cb(&SearchProgress {
                batch,
                trials_done: stats.trials,
                n_trials: config.n_trials,
                completed: stats.completed,
                pruned: stats.pruned,
                failed: stats.failed,
                best_score: best_seen.get().map(|r| r.score),
                elapsed_secs: start_time.elapsed().as_secs_f64(),
            });
        }

        batch += 1;
        next_index = end;
    }

    stats.elapsed_secs = start_time.elapsed().as_secs_f64();
    let best_seen = best_seen.into_inner();
    let candidate = best_completed.into_inner().or_else(|| best_seen.clone());
    let verdict = match candidate {
        None => Verdict::NoTrialCompleted,
        Some(candidate) => match candidate.metrics.as_ref() {
            Some(m) => {
                let violations = config.acceptance.check(m);
                if violations.is_empty() {
                    Verdict::Accepted { best: candidate }
                } else {
                    Verdict::NotAccepted {
                        candidate,
                        violations,
                    }
                }
            }
            None => Verdict::NoTrialCompleted,
        },
    };

    tracing::info!(
        completed = stats.completed,
        pruned = stats.pruned,
        failed = stats.failed,
        timed_out = stats.timed_out,
        accepted = verdict.is_accepted(),
        elapsed_secs = stats.elapsed_secs,
        "search finished"
    );

    Ok(SearchReport {
        verdict,
        best_seen,
        leaderboard,
        stats,
        trials,
    })
}

enum TrialFailure {
    Error(String),
    Panicked(String),
    TimedOut(Duration),
}

fn run_trial(
    evaluator: &Arc<dyn TrialEvaluator>,
    index: usize,
    params: TrialParams,
    config: &SearchConfig,
) -> TrialRecord {
    let run_id = params.fingerprint();
    let outcome = match config.trial_timeout {
        None => evaluate_caught(evaluator.as_ref(), &params),
        Some(limit) => evaluate_with_timeout(evaluator, index, &params, limit),
    };
    let (metrics, score, state) = match outcome {
        Ok(m) => {
            let scored = config.scoring.score(&m);
            let state = if scored.pruned {
                TrialState::Pruned
            } else {
                TrialState::Completed
            };
            (Some(m), scored.score, state)
        }
        Err(failure) => {
            let (reason, timed_out) = match failure {
                TrialFailure::Error(e) => (e, false),
                TrialFailure::Panicked(msg) => (format!("evaluator panicked: {msg}"), false),
                TrialFailure::TimedOut(limit) => {
                    (format!("timed out after {:.3}s", limit.as_secs_f64()), true)
                }
            };
            (
                None,
                f64::NEG_INFINITY,
                TrialState::Failed { reason, timed_out },
            )
        }
    };
    TrialRecord {
        index,
        run_id,
        params,
        metrics,
        score,
        state,
    }
}

fn evaluate_caught(
    evaluator: &dyn TrialEvaluator,
    params: &TrialParams,
) -> Result<PerformanceMetrics, TrialFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(params))) {
        Ok(Ok(m)) => Ok(m),
        Ok(Err(e)) => Err(TrialFailure::Error(e.to_string())),
        Err(payload) => Err(TrialFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

// The worker is detached: a timed-out evaluation keeps running until it returns.
fn evaluate_with_timeout(
    evaluator: &Arc<dyn TrialEvaluator>,
    index: usize,
    params: &TrialParams,
    limit: Duration,
) -> Result<PerformanceMetrics, TrialFailure> {
    let (tx, rx) = mpsc::channel();
    let worker_eval = Arc::clone(evaluator);
    let worker_params = params.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("xsmom-trial-{index}"))
        .spawn(move || {
            let _ = tx.send(evaluate_caught(worker_eval.as_ref(), &worker_params));
        });
    if let Err(e) = spawned {
        return Err(TrialFailure::Error(format!("failed to spawn trial worker: {e}")));
    }
    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(TrialFailure::TimedOut(limit)),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(TrialFailure::Error("trial worker exited without a result".into()))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use xsmom_core::SignalMode;

    fn metrics_with(sharpe: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            sharpe,
            ann_return: 0.02 * sharpe,
            ann_vol: 0.1,
            max_dd: -0.1,
            calmar: 0.2,
            pot: 3.0,
            turnover: 0.2,
            total_pnl: 0.1,
            n_days: 500,
        }
    }

    // Smooth objective peaking at window 120.
    fn peaked() -> Arc<dyn TrialEvaluator> {
        Arc::new(FnEvaluator::new(|p: &TrialParams| {
            let d = (p.window as f64 - 120.0) / 100.0;
            Ok(metrics_with(3.0 - d * d))
        }))
    }

    fn record(index: usize, score: f64, state: TrialState) -> TrialRecord {
        let params = TrialParams {
            window: 10 + index,
            skip: 1,
            clip: None,
            trade_percent: 0.2,
            gross_target: 1.0,
            hold_period: 5,
            strategy: SignalMode::Simple,
        };
        TrialRecord {
            index,
            run_id: params.fingerprint(),
            params,
            metrics: Some(metrics_with(score)),
            score,
            state,
        }
    }

    #[test]
    fn best_trial_replaces_only_on_strict_improvement() {
        let mut best = BestTrial::new();
        assert!(best.offer(&record(0, f64::NAN, TrialState::Completed)));
        assert!(best.offer(&record(1, 1.0, TrialState::Completed)));
        assert!(!best.offer(&record(2, 1.0, TrialState::Completed)));
        assert!(!best.offer(&record(3, f64::NAN, TrialState::Completed)));
        assert!(best.offer(&record(4, 2.0, TrialState::Pruned)));
        assert_eq!(best.get().map(|r| r.index), Some(4));
    }

    #[test]
    fn model_ignores_pruned_failed_and_nan() {
        let config = SearchConfig {
            top_k: 2,
            ..SearchConfig::default()
        };
        let mut model = SearchModel::new(SearchSpace::default(), &config);
        model.observe(&record(0, 5.0, TrialState::Pruned));
        model.observe(&record(
            1,
            f64::NEG_INFINITY,
            TrialState::Failed {
                reason: "x".into(),
                timed_out: false,
            },
        ));
        model.observe(&record(2, f64::NAN, TrialState::Completed));
        assert_eq!(model.elite_len(), 0);
        model.observe(&record(3, 1.0, TrialState::Completed));
        model.observe(&record(4, 2.0, TrialState::Completed));
        model.observe(&record(5, 0.5, TrialState::Completed));
        assert_eq!(model.elite_len(), 2);
    }

    #[test]
    fn search_runs_all_trials_and_accepts() {
        let config = SearchConfig {
            n_trials: 40,
            seed: 7,
            ..SearchConfig::default()
        };
        let report = search(peaked(), &SearchSpace::default(), &config, None).unwrap();
        assert_eq!(report.trials.len(), 40);
        assert_eq!(report.stats.completed, 40);
        assert!(report.verdict.is_accepted());
        let indices: Vec<usize> = report.trials.iter().map(|t| t.index).collect();
        assert_eq!(indices, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn progress_called_once_per_batch() {
        let config = SearchConfig {
            n_trials: 10,
            batch_size: 4,
            ..SearchConfig::default()
        };
        let calls = std::sync::Mutex::new(Vec::new());
        let cb = |p: &SearchProgress| calls.lock().unwrap().push(p.trials_done);
        search(peaked(), &SearchSpace::default(), &config, Some(&cb)).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![4, 8, 10]);
    }

    #[test]
    fn invalid_config_rejected() {
        let config = SearchConfig {
            batch_size: 0,
            ..SearchConfig::default()
        };
        assert!(matches!(
            search(peaked(), &SearchSpace::default(), &config, None),
            Err(SearchError::Invalid(_))
        ));
    }

    #[test]
    fn zero_trials_reports_nothing_completed() {
        let config = SearchConfig {
            n_trials: 0,
            ..SearchConfig::default()
        };
        let report = search(peaked(), &SearchSpace::default(), &config, None).unwrap();
        assert!(matches!(report.verdict, Verdict::NoTrialCompleted));
        assert!(report.best_seen.is_none());
    }
}
