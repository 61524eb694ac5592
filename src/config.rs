//! Configuration system for the foraging experiments.
//!
//! Supports YAML configuration files with sensible defaults.

use crate::error::{Result, SimError};
use crate::grid::BoundaryMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Largest stable value of `kappa * dt` for the explicit 5-point stencil
pub const DIFFUSION_STABILITY_LIMIT: f64 = 0.25;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub sim: SimConfig,
    pub run: RunConfig,
    pub sweep: SweepConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine parameters for one run. Immutable once the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimConfig {
    /// Side length of the square lattice
    pub grid_size: usize,
    /// Diffusion coefficient
    pub diffusion_kappa: f64,
    /// Bath temperature T0 dividing every dissipation proxy
    pub bath_temperature: f64,
    /// Boundary policy
    pub boundary_mode: BoundaryMode,
    /// Resource injected at the center cell per unit time
    pub inflow_rate: f64,
    /// Maximum uptake per agent per unit time
    pub consumption_rate: f64,
    /// Agents seeded around the center
    pub initial_agents: usize,
    /// Std-dev of initial agent placement around the center
    pub initial_spread: f64,
    /// Seed for master state and run streams
    pub seed: u64,
    /// Information cost per unit of sensed gradient magnitude
    pub intelligence_cost: f64,
    /// Sensing offset along each axis, in cells
    pub look_distance: usize,
    /// Std-dev of Gaussian noise on each sensed sample
    pub sensing_noise: f64,
    /// Floor noisy samples at zero
    pub clamp_sensing: bool,
    /// Energy at which an agent divides
    pub division_threshold: f64,
    /// Energy paid to divide
    pub division_cost: f64,
    /// Std-dev of child placement around the parent
    pub division_jitter: f64,
    /// Population capacity
    pub max_agents: usize,
    /// Velocity damping base, applied as friction^dt
    pub friction: f64,
    /// Tick duration
    pub time_step: f64,
    /// Fixed upkeep per unit time
    pub maintenance_cost: f64,
    /// Fixed component of the information cost per unit time
    pub info_base_cost: f64,
    /// Std-dev of the random-mode velocity increment
    pub random_kick: f64,
    /// Acceleration per unit sensed gradient
    pub gradient_gain: f64,
    /// Energy of each seeded agent
    pub initial_energy: f64,
    /// Uniform starting value of every cell
    pub initial_field_level: f64,
}

/// Run driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Tick budget; also the RMST horizon
    pub max_ticks: u64,
    /// Ticks skipped before the measurement window opens
    pub burn_in: u64,
    /// Length of the measurement window
    pub measure_ticks: u64,
    /// Length of the trailing window before termination
    pub tail_ticks: usize,
}

/// Parameter grid and worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepConfig {
    pub inflows: Vec<f64>,
    pub costs: Vec<f64>,
    pub noises: Vec<f64>,
    pub seeds: Vec<u64>,
    /// Worker threads (0 = available parallelism)
    pub workers: usize,
}

/// Statistics engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsConfig {
    /// Bootstrap resamples
    pub resamples: usize,
    /// Two-sided significance level of the bootstrap intervals
    pub alpha: f64,
    /// Base seed for bootstrap streams
    pub seed: u64,
}

/// Field snapshots captured during a sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    pub targets: Vec<SnapshotTarget>,
}

/// One (seed, cost, noise, inflow, tick) selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTarget {
    pub seed: u64,
    pub cost: f64,
    pub noise: f64,
    pub inflow: f64,
    pub tick: u64,
}

impl FromStr for SnapshotTarget {
    type Err = String;

    /// Parse `seed:cost:noise:inflow:tick`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let [seed, cost, noise, inflow, tick] = parts.as_slice() else {
            return Err(format!("expected seed:cost:noise:inflow:tick, got '{}'", s));
        };
        let real = |name: &str, text: &str| {
            text.parse::<f64>()
                .map_err(|e| format!("bad {} '{}': {}", name, text, e))
        };

        Ok(Self {
            seed: seed.parse().map_err(|e| format!("bad seed '{}': {}", seed, e))?,
            cost: real("cost", cost)?,
            noise: real("noise", noise)?,
            inflow: real("inflow", inflow)?,
            tick: tick.parse().map_err(|e| format!("bad tick '{}': {}", tick, e))?,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Completed jobs between progress lines
    pub progress_interval: usize,
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sim: SimConfig::default(),
            run: RunConfig::default(),
            sweep: SweepConfig::default(),
            stats: StatsConfig::default(),
            snapshots: SnapshotConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            grid_size: 41,
            diffusion_kappa: 0.2,
            bath_temperature: 1.0,
            boundary_mode: BoundaryMode::Isothermal,
            inflow_rate: 0.1,
            consumption_rate: 0.05,
            initial_agents: 20,
            initial_spread: 2.0,
            seed: 0,
            intelligence_cost: 0.02,
            look_distance: 2,
            sensing_noise: 0.0,
            clamp_sensing: true,
            division_threshold: 2.0,
            division_cost: 0.2,
            division_jitter: 0.5,
            max_agents: 400,
            friction: 0.9,
            time_step: 1.0,
            maintenance_cost: 0.01,
            info_base_cost: 0.001,
            random_kick: 0.2,
            gradient_gain: 5.0,
            initial_energy: 1.0,
            initial_field_level: 0.0,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_ticks: 2000,
            burn_in: 200,
            measure_ticks: 1000,
            tail_ticks: 200,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            inflows: vec![0.05, 0.1, 0.15],
            costs: vec![0.02],
            noises: vec![0.0],
            seeds: (0..10).collect(),
            workers: 0,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            resamples: 2000,
            alpha: 0.05,
            seed: 12345,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            progress_interval: 10,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.sim.validate()?;
        self.run.validate()?;
        self.sweep.validate()?;
        self.stats.validate()?;
        Ok(())
    }
}

impl SimConfig {
    /// Fail fast when `kappa * dt` breaks the explicit-diffusion bound
    pub fn check_stability(&self) -> Result<()> {
        let product = self.diffusion_kappa * self.time_step;
        if !product.is_finite() || product > DIFFUSION_STABILITY_LIMIT {
            return Err(SimError::Unstable {
                kappa: self.diffusion_kappa,
                dt: self.time_step,
                product,
            });
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.check_stability()?;

        if self.grid_size == 0 {
            return invalid("gridSize must be > 0");
        }
        let reals = [
            ("diffusionKappa", self.diffusion_kappa),
            ("bathTemperature", self.bath_temperature),
            ("inflowRate", self.inflow_rate),
            ("consumptionRate", self.consumption_rate),
            ("initialSpread", self.initial_spread),
            ("intelligenceCost", self.intelligence_cost),
            ("sensingNoise", self.sensing_noise),
            ("divisionThreshold", self.division_threshold),
            ("divisionCost", self.division_cost),
            ("divisionJitter", self.division_jitter),
            ("friction", self.friction),
            ("timeStep", self.time_step),
            ("maintenanceCost", self.maintenance_cost),
            ("infoBaseCost", self.info_base_cost),
            ("randomKick", self.random_kick),
            ("gradientGain", self.gradient_gain),
            ("initialEnergy", self.initial_energy),
            ("initialFieldLevel", self.initial_field_level),
        ];
        for (name, value) in reals {
            if !value.is_finite() || value < 0.0 {
                return invalid(&format!("{} must be finite and >= 0 (got {})", name, value));
            }
        }
        if self.bath_temperature <= 0.0 {
            return invalid("bathTemperature must be > 0");
        }
        if self.time_step <= 0.0 {
            return invalid("timeStep must be > 0");
        }
        if self.friction <= 0.0 || self.friction > 1.0 {
            return invalid("friction must be in (0, 1]");
        }
        if self.look_distance == 0 {
            return invalid("lookDistance must be >= 1");
        }
        if self.initial_agents > self.max_agents {
            return invalid("initialAgents cannot exceed maxAgents");
        }
        Ok(())
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_ticks == 0 {
            return invalid("maxTicks must be > 0");
        }
        Ok(())
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.inflows.is_empty() || self.costs.is_empty() || self.noises.is_empty() {
            return invalid("sweep needs at least one inflow, cost and noise value");
        }
        if self.seeds.is_empty() {
            return invalid("sweep needs at least one seed");
        }
        let all = self.inflows.iter().chain(&self.costs).chain(&self.noises);
        for &value in all {
            if !value.is_finite() || value < 0.0 {
                return invalid(&format!("sweep values must be finite and >= 0 (got {})", value));
            }
        }
        Ok(())
    }

    /// Total number of jobs in the grid
    pub fn job_count(&self) -> usize {
        self.inflows.len() * self.costs.len() * self.noises.len() * self.seeds.len()
    }

    /// Resolved worker count
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resamples == 0 {
            return invalid("stats.resamples must be > 0");
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid("stats.alpha must be in (0, 1)");
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(SimError::InvalidConfig(message.to_string()))
}
