//! xsmom CLI: research runs, hyperparameter search and config scaffolding.
//!
//! Commands:
//! - `run`: one pipeline run from a TOML config; prints metrics
//! - `optimize`: hyperparameter search with acceptance filtering
//! - `init-config`: write a starter TOML config

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use xsmom_core::{PerformanceMetrics, SignalMode};
use xsmom_runner::{
    export, init_logging, load_prices, search, source_for_paths, AcceptanceCriteria,
    PenaltyWeights, Pipeline, PriceRequest, PriceSource, ResearchConfig, ScoringPolicy,
    SearchConfig, SearchProgress, SearchReport, SearchSpace, SyntheticPriceSource, Verdict,
};

#[derive(Parser)]
#[command(
    name = "xsmom",
    about = "xsmom: cross-sectional momentum research engine"
)]
struct Cli {
    /// Log pipeline progress (RUST_LOG overrides).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where prices come from, shared by `run` and `optimize`.
#[derive(clap::Args)]
struct DataArgs {
    /// Path to the TOML research config.
    #[arg(long)]
    config: PathBuf,

    /// Comma-separated instrument codes (e.g. rb,cu,al).
    #[arg(long, value_delimiter = ',', required = true)]
    instruments: Vec<String>,

    /// First trading day (YYYYMMDD).
    #[arg(long)]
    start: u32,

    /// Last trading day (YYYYMMDD). Open-ended when omitted.
    #[arg(long)]
    end: Option<u32>,

    /// Use a synthetic random walk instead of the configured data source.
    #[arg(long, default_value_t = false)]
    synthetic: bool,

    /// Seed for synthetic prices.
    #[arg(long, default_value_t = 42)]
    data_seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run signal, positions, backtest and metrics once.
    Run {
        #[command(flatten)]
        data: DataArgs,

        /// Signal mode: simple, linear or exponential.
        #[arg(long, default_value = "simple")]
        strategy: SignalMode,

        /// Write backtest.csv, positions.csv, signal.csv and metrics.json here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Search signal and trade parameters, then apply the acceptance filter.
    Optimize {
        #[command(flatten)]
        data: DataArgs,

        #[arg(long, default_value_t = 100)]
        trials: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(long, default_value_t = 1)]
        threads: usize,

        #[arg(long, default_value_t = 8)]
        batch_size: usize,

        /// Restrict the search to one signal mode.
        #[arg(long)]
        strategy: Option<SignalMode>,

        #[arg(long, value_enum, default_value_t = Scoring::Soft)]
        scoring: Scoring,

        /// Sharpe floor for pruning and acceptance.
        #[arg(long, default_value_t = 1.0)]
        min_sharpe: f64,

        /// Per-trial time limit in seconds.
        #[arg(long)]
        timeout_secs: Option<f64>,

        /// Write trials.jsonl, best.json and leaderboard.json here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Write a starter config file.
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scoring {
    /// Sharpe minus weighted threshold shortfalls.
    Soft,
    /// Sharpe; trials under --min-sharpe are pruned.
    Prune,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            data,
            strategy,
            output_dir,
        } => run_cmd(&data, strategy, output_dir.as_deref()),
        Commands::Optimize {
            data,
            trials,
            seed,
            threads,
            batch_size,
            strategy,
            scoring,
            min_sharpe,
            timeout_secs,
            output_dir,
        } => {
            let scoring = match scoring {
                Scoring::Soft => ScoringPolicy::SoftPenalty(PenaltyWeights {
                    target_sharpe: min_sharpe,
                    ..PenaltyWeights::default()
                }),
                Scoring::Prune => ScoringPolicy::HardPrune { min_sharpe },
            };
            let trial_timeout = timeout_secs.map(parse_timeout).transpose()?;
            let search_config = SearchConfig {
                n_trials: trials,
                seed,
                threads,
                batch_size,
                scoring,
                acceptance: AcceptanceCriteria {
                    min_sharpe,
                    ..AcceptanceCriteria::default()
                },
                trial_timeout,
                ..SearchConfig::default()
            };
            let space = match strategy {
                Some(mode) => SearchSpace::default().with_strategy(mode),
                None => SearchSpace::default(),
            };
            optimize_cmd(&data, &space, &search_config, output_dir.as_deref())
        }
        Commands::InitConfig { path, force } => init_config_cmd(&path, force),
    }
}

/// Seconds to a per-trial limit. Rejects zero, negative, non-finite and
/// out-of-range values instead of panicking.
fn parse_timeout(secs: f64) -> Result<Duration> {
    if !(secs > 0.0) {
        bail!("--timeout-secs must be a positive number of seconds, got {secs}");
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow::anyhow!("--timeout-secs {secs} is out of range: {e}"))
}

fn load_pipeline(data: &DataArgs) -> Result<Pipeline> {
    let config = ResearchConfig::from_file(&data.config)?;
    let request = PriceRequest::new(data.instruments.clone(), data.start, data.end);
    let source: Box<dyn PriceSource> = if data.synthetic {
        Box::new(SyntheticPriceSource::new(data.data_seed))
    } else {
        source_for_paths(
            config.data.db_path.as_deref(),
            &config.data.table,
            config.data.csv_path.as_deref(),
        )?
    };
    let prices = load_prices(source.as_ref(), &request)?;
    if data.synthetic {
        eprintln!("WARNING: using SYNTHETIC prices; results are not research-grade");
    }
    Ok(Pipeline::new(config, prices))
}

fn run_cmd(data: &DataArgs, strategy: SignalMode, output_dir: Option<&Path>) -> Result<()> {
    let pipeline = load_pipeline(data)?;
    let out = pipeline.evaluate(strategy, None)?;
    if out.signal.is_all_unknown() {
        eprintln!("WARNING: not enough history for the configured window; the book stayed flat");
    }

    println!();
    println!("=== Research Run ===");
    println!("Strategy:       {strategy}");
    println!("Instruments:    {}", pipeline.prices().ncols());
    println!("Days:           {}", pipeline.prices().nrows());
    println!("Dataset:        {}", pipeline.dataset_hash());
    print_metrics(&out.performance);

    if let Some(dir) = output_dir {
        export::save_run_artifacts(&out, dir)?;
        println!("Artifacts saved to: {}", dir.display());
    }
    Ok(())
}

fn optimize_cmd(
    data: &DataArgs,
    space: &SearchSpace,
    config: &SearchConfig,
    output_dir: Option<&Path>,
) -> Result<()> {
    let pipeline = Arc::new(load_pipeline(data)?);
    tracing::info!(trials = config.n_trials, threads = config.threads, "optimizing");

    let progress = |p: &SearchProgress| {
        eprintln!(
            "[{}/{}] completed {} pruned {} failed {} best {}",
            p.trials_done,
            p.n_trials,
            p.completed,
            p.pruned,
            p.failed,
            p.best_score
                .map(|s| format!("{s:.4}"))
                .unwrap_or_else(|| "-".into())
        );
    };
    let report = search(pipeline, space, config, Some(&progress))?;

    print_report(&report)?;
    if let Some(dir) = output_dir {
        export::save_search_artifacts(&report, dir)?;
        println!("Artifacts saved to: {}", dir.display());
    }

    if !report.verdict.is_accepted() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_config_cmd(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, ResearchConfig::template())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn print_metrics(m: &PerformanceMetrics) {
    println!();
    println!("--- Performance ---");
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Ann. Return:    {:.2}%", m.ann_return * 100.0);
    println!("Ann. Vol:       {:.2}%", m.ann_vol * 100.0);
    println!("Max Drawdown:   {:.2}%", m.max_dd * 100.0);
    println!("Calmar:         {:.3}", m.calmar);
    println!("PnL/Turnover:   {:.2} bp", m.pot);
    println!("Turnover:       {:.4}/day", m.turnover);
    println!("Total PnL:      {:.4}", m.total_pnl);
}

fn print_report(report: &SearchReport) -> Result<()> {
    let s = &report.stats;
    println!();
    println!("=== Search Result ===");
    println!(
        "Trials:         {} ({} completed, {} pruned, {} failed, {} timed out)",
        s.trials, s.completed, s.pruned, s.failed, s.timed_out
    );
    println!("Elapsed:        {:.1}s", s.elapsed_secs);

    match &report.verdict {
        Verdict::Accepted { best } => {
            println!("Verdict:        ACCEPTED (trial {})", best.index);
            println!("Parameters:\n{}", serde_json::to_string_pretty(&best.params)?);
            if let Some(m) = &best.metrics {
                print_metrics(m);
            }
        }
        Verdict::NotAccepted {
            candidate,
            violations,
        } => {
            println!("Verdict:        NOT ACCEPTED (best trial {})", candidate.index);
            for v in violations {
                println!("  - {v}");
            }
            println!("Parameters:\n{}", serde_json::to_string_pretty(&candidate.params)?);
            if let Some(m) = &candidate.metrics {
                print_metrics(m);
            }
        }
        Verdict::NoTrialCompleted => {
            println!("Verdict:        NO TRIAL COMPLETED");
            if let Some(reason) = report.trials.iter().find_map(|t| match &t.state {
                xsmom_runner::TrialState::Failed { reason, .. } => Some(reason.as_str()),
                _ => None,
            }) {
                println!("First failure:  {reason}");
            }
        }
    }
    Ok(())
}
