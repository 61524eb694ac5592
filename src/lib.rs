//! # FORAGE-SWEEP
//!
//! Paired random/informed foraging experiments on a diffusing resource field.
//!
//! ## Features
//!
//! - **Conservative**: the engine closes its energy budget every tick
//! - **Paired**: both behaviors start from the same master state and seed
//! - **Parallel**: sweep jobs run on a worker pool, groups aggregate via Rayon
//! - **Configurable**: YAML configuration files
//! - **Reproducible**: results do not depend on worker count
//!
//! All `sigma` quantities are dissipation proxies, not thermodynamic entropy
//! production.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forage_sweep::{Config, Mode, World};
//!
//! let config = Config::default();
//! let mut world = World::new(config.sim).unwrap();
//!
//! for _ in 0..1000 {
//!     let stats = world.update(Mode::Informed).unwrap();
//!     if stats.population == 0 {
//!         break;
//!     }
//! }
//! println!("Population: {}", world.population());
//! ```
//!
//! ## Sweeps
//!
//! ```rust,no_run
//! use forage_sweep::{run_sweep, Config};
//!
//! let mut config = Config::default();
//! config.sweep.inflows = vec![0.05, 0.1, 0.2];
//! config.sweep.seeds = (0..20).collect();
//!
//! let report = run_sweep(config, "output").unwrap();
//! println!("{}", report);
//! ```
//!
//! ## State files
//!
//! ```rust,no_run
//! use forage_sweep::{Config, World};
//! use forage_sweep::checkpoint::WorldState;
//!
//! let config = Config::default();
//! let state = World::master_state(&config.sim).unwrap();
//! state.save("master.bin").unwrap();
//!
//! let loaded = WorldState::load("master.bin").unwrap();
//! let world = World::from_state(config.sim, loaded).unwrap();
//! ```

pub mod agent;
pub mod analysis;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod grid;
pub mod rng;
pub mod run;
pub mod stats;
pub mod sweep;
pub mod world;

// Re-export main types
pub use config::{Config, SimConfig};
pub use error::{Result, SimError};
pub use run::{RunOutcome, RunSummary};
pub use sweep::{JobResult, SweepScheduler};
pub use world::{Mode, World};

use analysis::{ExportManifest, ExportSystem, GroupAggregate};
use std::path::Path;
use std::time::Instant;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the sweep, aggregate by parameter point and write every artifact
/// into `output`
pub fn run_sweep<P: AsRef<Path>>(config: Config, output: P) -> Result<SweepReport> {
    let start = Instant::now();

    let scheduler = SweepScheduler::new(config)?;
    let workers = scheduler.workers();
    let results = scheduler.run()?;
    let aggregates = analysis::aggregate_results(&results, scheduler.config())?;
    let manifest = ExportSystem::export_all(output, &results, &aggregates, scheduler.config(), workers)?;

    Ok(SweepReport {
        jobs: results.len(),
        workers,
        aggregates,
        manifest,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

/// Outcome of `run_sweep`
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub jobs: usize,
    pub workers: usize,
    pub aggregates: Vec<GroupAggregate>,
    pub manifest: ExportManifest,
    pub elapsed_secs: f64,
}

impl std::fmt::Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Sweep Results ===")?;
        writeln!(f, "Jobs: {} on {} workers", self.jobs, self.workers)?;
        writeln!(f, "Time: {:.2}s", self.elapsed_secs)?;
        for agg in &self.aggregates {
            let ci = agg
                .d_rmst_ci
                .map_or_else(|| "n/a".to_string(), |ci| format!("[{:.2}, {:.2}]", ci.lo, ci.hi));
            writeln!(
                f,
                "noise {:.3} inflow {:.3} cost {:.3}: dRMST {:+.2} {} (pairs {})",
                agg.noise, agg.inflow, agg.cost, agg.d_rmst, ci, agg.n_pairs
            )?;
        }
        writeln!(f, "Output: {}", self.manifest.agg.display())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_quick_simulation() {
        let mut world = World::new(SimConfig::default()).unwrap();

        for _ in 0..100 {
            world.update(Mode::Random).unwrap();
        }

        assert_eq!(world.time, 100);
    }
}
