//! Error types shared across the engine, sweep and statistics layers.
//!
//! Every failure is fatal to the caller. Nothing in the crate retries.

use crate::checkpoint::CheckpointError;
use crate::stats::EngineStepStats;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors raised by configuration, simulation, scheduling and analysis
#[derive(Debug, Error)]
pub enum SimError {
    /// Explicit diffusion would blow up with these parameters
    #[error("diffusion unstable: kappa*dt = {product} exceeds 0.25 (kappa={kappa}, dt={dt})")]
    Unstable { kappa: f64, dt: f64, product: f64 },

    /// Any other invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tick produced NaN or infinity somewhere in its statistics
    #[error("non-finite value in `{field}` at tick {tick}: {stats:?}")]
    NonFinite {
        tick: u64,
        field: &'static str,
        stats: Box<EngineStepStats>,
    },

    /// A statistics record broke the demographic or bookkeeping contract
    #[error("statistics contract violated at tick {tick}: {message}")]
    Contract { tick: u64, message: String },

    /// A sweep job failed; the whole pool was shut down
    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: usize, message: String },

    /// A parameter group lacks survival records for one arm
    #[error("parameter group {key} has no survival records for the {arm} arm")]
    EmptyGroup { key: String, arm: &'static str },

    /// An input file could not be interpreted
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("state file error: {0}")]
    Checkpoint(#[from] CheckpointError),
}
