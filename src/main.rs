//! FORAGE-SWEEP - CLI Entry Point
//!
//! Paired random/informed foraging sweeps.

use clap::{Parser, Subcommand};
use forage_sweep::analysis::crossings::crossings_from_agg;
use forage_sweep::config::{LoggingConfig, SnapshotTarget};
use forage_sweep::run::{run_mode, RunSummary};
use forage_sweep::{run_sweep, Config, Mode, World};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "forage-sweep")]
#[command(version)]
#[command(about = "Paired random/informed foraging sweeps on a diffusing resource field")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full parameter sweep and write all artifacts
    Sweep {
        /// Configuration file (YAML); defaults are used if it does not exist
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Inflow rates (comma separated)
        #[arg(long, value_delimiter = ',')]
        inflow: Vec<f64>,

        /// Intelligence costs (comma separated)
        #[arg(long, value_delimiter = ',')]
        cost: Vec<f64>,

        /// Sensing noise levels (comma separated)
        #[arg(long, value_delimiter = ',')]
        noise: Vec<f64>,

        /// Use seeds 0..N
        #[arg(long, conflicts_with = "seed_list")]
        seeds: Option<u64>,

        /// Explicit seeds (comma separated)
        #[arg(long, value_delimiter = ',')]
        seed_list: Vec<u64>,

        /// Worker threads (0 = all cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Tick budget per run
        #[arg(long)]
        max_ticks: Option<u64>,

        /// Snapshot target seed:cost:noise:inflow:tick (repeatable)
        #[arg(long)]
        snapshot: Vec<SnapshotTarget>,
    },

    /// Run one paired job and print both summaries
    Run {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Random seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Tick budget
        #[arg(short, long)]
        ticks: Option<u64>,

        #[arg(long)]
        inflow: Option<f64>,

        #[arg(long)]
        cost: Option<f64>,

        #[arg(long)]
        noise: Option<f64>,

        /// Save the master state to this file
        #[arg(long)]
        save_state: Option<PathBuf>,
    },

    /// Generate default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Report zero crossings of an agg.csv column along the inflow axis
    Crossings {
        /// Aggregated results file
        #[arg(long, default_value = "output/agg.csv")]
        agg: PathBuf,

        /// Column to scan
        #[arg(long, default_value = "dRmst")]
        column: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep {
            config,
            output,
            inflow,
            cost,
            noise,
            seeds,
            seed_list,
            workers,
            max_ticks,
            snapshot,
        } => {
            let mut config = load_config(&config)?;
            init_logging(&config.logging);

            let sweep = &mut config.sweep;
            if !inflow.is_empty() {
                sweep.inflows = inflow;
            }
            if !cost.is_empty() {
                sweep.costs = cost;
            }
            if !noise.is_empty() {
                sweep.noises = noise;
            }
            if let Some(n) = seeds {
                sweep.seeds = (0..n).collect();
            }
            if !seed_list.is_empty() {
                sweep.seeds = seed_list;
            }
            if let Some(w) = workers {
                sweep.workers = w;
            }
            if let Some(t) = max_ticks {
                config.run.max_ticks = t;
            }
            config.snapshots.targets.extend(snapshot);

            run_full_sweep(config, output)
        }

        Commands::Run {
            config,
            seed,
            ticks,
            inflow,
            cost,
            noise,
            save_state,
        } => {
            let mut config = load_config(&config)?;
            init_logging(&config.logging);

            config.sim.seed = seed;
            if let Some(t) = ticks {
                config.run.max_ticks = t;
            }
            if let Some(v) = inflow {
                config.sim.inflow_rate = v;
            }
            if let Some(v) = cost {
                config.sim.intelligence_cost = v;
            }
            if let Some(v) = noise {
                config.sim.sensing_noise = v;
            }

            run_paired(config, save_state)
        }

        Commands::Init { output } => {
            init_logging(&LoggingConfig::default());
            generate_config(output)
        }

        Commands::Crossings { agg, column } => {
            init_logging(&LoggingConfig::default());
            report_crossings(&agg, &column)
        }
    }
}

/// `RUST_LOG` wins over the configured level
fn init_logging(logging: &LoggingConfig) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(logging.log_level.as_str())).init();
}

fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if path.exists() {
        println!("Loading config from: {:?}", path);
        Ok(Config::from_file(path)?)
    } else {
        println!("Using default configuration");
        Ok(Config::default())
    }
}

fn run_full_sweep(config: Config, output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    println!("Starting sweep");
    println!("  Grid size: {}x{}", config.sim.grid_size, config.sim.grid_size);
    println!("  Inflows: {:?}", config.sweep.inflows);
    println!("  Costs: {:?}", config.sweep.costs);
    println!("  Noises: {:?}", config.sweep.noises);
    println!("  Seeds: {}", config.sweep.seeds.len());
    println!("  Jobs: {}", config.sweep.job_count());
    println!("  Max ticks: {}", config.run.max_ticks);
    println!();

    let report = run_sweep(config, &output)?;
    println!("{}", report);

    Ok(())
}

fn run_paired(config: Config, save_state: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let state = World::master_state(&config.sim)?;
    if let Some(path) = save_state {
        state.save(&path)?;
        println!("Master state saved: {:?}", path);
    }

    println!("Starting paired run");
    println!("  Seed: {}", config.sim.seed);
    println!("  Initial population: {}", state.agents.len());
    println!("  Inflow: {}  Cost: {}  Noise: {}", config.sim.inflow_rate, config.sim.intelligence_cost, config.sim.sensing_noise);
    println!();

    let start = Instant::now();
    for mode in [Mode::Random, Mode::Informed] {
        let outcome = run_mode(&config.sim, &config.run, state.clone(), mode, &[])?;
        print_summary(&outcome.summary);
    }
    info!("Paired run finished in {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}

fn print_summary(s: &RunSummary) {
    println!("=== {} ===", s.mode);
    println!(
        "Survival: {} ticks ({})",
        s.survival_ticks,
        if s.event == 1 { "extinct" } else { "censored" }
    );
    println!(
        "Sigma proxy cum: {:.4} (diffusive {:.4}, behavioral {:.4})",
        s.sigma_proxy_cum, s.sigma_proxy_diff_cum, s.sigma_proxy_behav_cum
    );
    println!("Agent expenditure: {:.4}  Uptake: {:.4}", s.agent_expenditure_cum, s.uptake_cum);
    println!("Births/Deaths: {}/{}  Peak population: {}", s.births_total, s.deaths_total, s.peak_population);
    println!("Max |residual|: {:.2e}", s.max_abs_residual);
    if let Some(m) = s.measure {
        println!("Measure window: {} ticks, sigma {:.5}, population {:.1}", m.ticks, m.sigma_total, m.population);
    }
    if let Some(m) = s.tail {
        println!("Tail window: {} ticks, sigma {:.5}, population {:.1}", m.ticks, m.sigma_total, m.population);
    }
    println!();
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save(&output)?;
    println!("Configuration saved to: {:?}", output);
    Ok(())
}

fn report_crossings(agg: &Path, column: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Zero Crossings of {} ===", column);
    println!("File: {:?}", agg);
    println!();

    for series in crossings_from_agg(agg, column)? {
        if series.crossings.is_empty() {
            println!("noise {} cost {}: no crossing ({} points)", series.noise, series.cost, series.points);
            continue;
        }
        for crossing in &series.crossings {
            println!(
                "noise {} cost {}: crossing at inflow {:.6} (after point {})",
                series.noise, series.cost, crossing.x, crossing.index
            );
        }
    }

    Ok(())
}
