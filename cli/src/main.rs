//! lootbox CLI - Command-line interface for the lootbox engine
//!
//! This binary is a thin harness over the engine: it reads JSON files,
//! runs one engine operation and prints the structured result as JSON on
//! stdout. Logs go to stderr (`RUST_LOG`, default `info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lootbox_engine::simulation::Sampler;
use lootbox_engine::{
    BalanceTargets, EngineConfig, Optimizer, RewardDistribution, SimulationEngine, Skeleton, StatisticsEngine,
    Strategy,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "lootbox")]
#[command(about = "Reward box probability toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration (JSON); defaults apply to missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Closed-form statistics for a distribution
    Analyze {
        /// Path to distribution JSON
        input: PathBuf,
    },

    /// Solve probabilities for a skeleton (or re-tune a distribution)
    Optimize {
        /// Path to skeleton JSON, or distribution JSON with --retune
        input: PathBuf,

        /// Target house edge in (0, 1)
        #[arg(short, long)]
        target: f64,

        #[arg(short, long, value_enum, default_value_t = StrategyArg::Direct)]
        strategy: StrategyArg,

        /// Seed for the evolutionary strategy
        #[arg(long)]
        seed: Option<u64>,

        /// Treat the input as a full distribution and start from its probabilities
        #[arg(long)]
        retune: bool,
    },

    /// Trade the house edge off against variance and tier share targets
    Balance {
        /// Path to skeleton JSON
        input: PathBuf,

        /// Balance targets JSON (edge, variance, tier shares, weights)
        #[arg(long)]
        targets: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = StrategyArg::Direct)]
        strategy: StrategyArg,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Re-solve a skeleton across the admissible cost range
    Sweep {
        /// Path to skeleton JSON
        input: PathBuf,

        #[arg(short, long)]
        target: f64,

        /// Number of evenly spaced costs
        #[arg(short, long, default_value_t = 10)]
        points: usize,

        #[arg(short, long, value_enum, default_value_t = StrategyArg::Direct)]
        strategy: StrategyArg,
    },

    /// Monte Carlo validation of a distribution
    Simulate {
        /// Path to distribution JSON
        input: PathBuf,

        /// Number of trials (config default if omitted)
        #[arg(short = 'n', long)]
        trials: Option<i64>,

        #[arg(long)]
        seed: Option<u64>,

        /// Also report percentile intervals at this level
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Win and loss streak patterns
    Streaks {
        /// Path to distribution JSON
        input: PathBuf,

        #[arg(short = 'n', long)]
        trials: Option<i64>,

        /// Value an opening must reach to count as a win (box cost if omitted)
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Raw sampling throughput
    Bench {
        /// Path to distribution JSON (built-in five tier box if omitted)
        input: Option<PathBuf>,

        #[arg(short = 'n', long, default_value_t = 1_000_000)]
        samples: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Direct,
    Evolutionary,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Direct => Strategy::Direct,
            StrategyArg::Evolutionary => Strategy::Evolutionary,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze { input } => {
            let dist = load_distribution(&input, &config)?;
            let analytics = StatisticsEngine::new(&config).analyze(&dist)?;
            print_json(&analytics)
        }
        Commands::Optimize {
            input,
            target,
            strategy,
            seed,
            retune,
        } => {
            if let Some(seed) = seed {
                config = config.seeded(seed);
            }
            let optimizer = Optimizer::new(&config);
            let skeleton = if retune {
                Skeleton::from_distribution(&load_distribution(&input, &config)?)
            } else {
                load_skeleton(&input)?
            };
            let result = optimizer.optimize(&skeleton, target, strategy.into())?;
            let distribution = if result.feasible {
                Some(result.clone().into_distribution(skeleton)?)
            } else {
                None
            };
            #[derive(Serialize)]
            struct Output {
                result: lootbox_engine::OptimizationResult,
                #[serde(skip_serializing_if = "Option::is_none")]
                distribution: Option<RewardDistribution>,
            }
            print_json(&Output { result, distribution })
        }
        Commands::Balance {
            input,
            targets,
            strategy,
            seed,
        } => {
            if let Some(seed) = seed {
                config = config.seeded(seed);
            }
            let skeleton = load_skeleton(&input)?;
            let targets: BalanceTargets = match targets {
                Some(path) => {
                    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str(&text).with_context(|| format!("parsing targets {}", path.display()))?
                }
                None => BalanceTargets::default(),
            };
            let result = Optimizer::new(&config).optimize_balanced(&skeleton, &targets, strategy.into())?;
            print_json(&result)
        }
        Commands::Sweep {
            input,
            target,
            points,
            strategy,
        } => {
            let skeleton = load_skeleton(&input)?;
            let sweep = Optimizer::new(&config).sweep_costs(&skeleton, target, points, strategy.into())?;
            print_json(&sweep)
        }
        Commands::Simulate {
            input,
            trials,
            seed,
            confidence,
        } => {
            let dist = load_distribution(&input, &config)?;
            let trials = trials.unwrap_or(config.simulation.default_trials as i64);
            let engine = SimulationEngine::new(&config);
            let report = engine.simulate(&dist, trials, seed)?;
            match confidence {
                Some(level) => {
                    let intervals = engine.confidence_intervals(&dist, trials, level, Some(report.seed))?;
                    print_json(&serde_json::json!({ "report": report, "confidence": intervals }))
                }
                None => print_json(&report),
            }
        }
        Commands::Streaks {
            input,
            trials,
            threshold,
            seed,
        } => {
            let dist = load_distribution(&input, &config)?;
            let trials = trials.unwrap_or(config.simulation.default_trials as i64);
            let report = SimulationEngine::new(&config).analyze_streaks(&dist, trials, threshold, seed)?;
            print_json(&report)
        }
        Commands::Bench { input, samples } => {
            let dist = match input {
                Some(path) => load_distribution(&path, &config)?,
                None => lootbox_engine::fixtures::five_tier_box(),
            };
            run_sampling_bench(&dist, &config, samples)
        }
    }
}

/// Single-thread draws per second, plus the empirical frequency of each
/// item next to its configured probability.
fn run_sampling_bench(dist: &RewardDistribution, config: &EngineConfig, samples: u64) -> Result<()> {
    if samples == 0 {
        bail!("sample count must be positive");
    }
    let sampler: Sampler = SimulationEngine::new(config).sampler(dist)?;
    println!("Running sampling benchmark on '{}'...", dist.name);
    println!("Sample size: {} draws", samples);

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut hits = vec![0u64; dist.items.len()];
    let start = Instant::now();
    for _ in 0..samples {
        hits[sampler.draw(&mut rng)] += 1;
    }
    let elapsed = start.elapsed();
    let draws_per_sec = samples as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

    println!("Results:");
    println!("  Duration: {} ms", elapsed.as_millis());
    println!("  Throughput: {:.2} draws/sec", draws_per_sec);
    println!("  Throughput: {:.2}M draws/sec", draws_per_sec / 1_000_000.0);
    for (item, count) in dist.items.iter().zip(&hits) {
        println!(
            "  {:<20} {:>8.5} (expected {:.5})",
            item.name,
            *count as f64 / samples as f64,
            item.probability
        );
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_distribution(path: &Path, config: &EngineConfig) -> Result<RewardDistribution> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let dist = RewardDistribution::from_json(&text, config)
        .with_context(|| format!("loading distribution {}", path.display()))?;
    info!(name = %dist.name, items = dist.items.len(), "distribution loaded");
    Ok(dist)
}

fn load_skeleton(path: &Path) -> Result<Skeleton> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing skeleton {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
