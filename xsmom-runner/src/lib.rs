//! xsmom runner: research orchestration on top of `xsmom-core`.
//!
//! - TOML research config with per-trial overrides
//! - Price loading from SQLite, long-format CSV or a synthetic random walk
//! - The four-stage research pipeline and its file-based entry point
//! - Hyperparameter search with pruning / soft-penalty scoring, acceptance
//!   filtering and a deduplicated trial leaderboard
//! - CSV / JSON / JSONL exports and tracing setup

pub mod acceptance;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod leaderboard;
pub mod logging;
pub mod optimizer;
pub mod pipeline;
pub mod scoring;
pub mod search_space;

pub use acceptance::{AcceptanceCriteria, Violation};
pub use config::{ConfigError, ResearchConfig, TrialOverrides};
pub use data_loader::{
    dataset_hash, source_for_paths, CsvPriceSource, LoadError, PriceRequest, PriceSource,
    SqlitePriceSource, SyntheticPriceSource,
};
pub use leaderboard::{InsertResult, TrialLeaderboard};
pub use logging::init_logging;
pub use optimizer::{
    search, BestTrial, FnEvaluator, SearchConfig, SearchError, SearchModel, SearchProgress,
    SearchReport, SearchStats, TrialEvaluator, TrialRecord, TrialState, Verdict,
};
pub use pipeline::{load_prices, run_pipeline, Pipeline, PipelineOutput, RunError};
pub use scoring::{PenaltyWeights, ScoringPolicy};
pub use search_space::{SearchSpace, TrialParams};
