//! Statistics, aggregation and export of sweep results.

pub mod aggregate;
pub mod bootstrap;
pub mod crossings;
pub mod engine;
pub mod export;
pub mod survival;

pub use aggregate::{aggregate_results, GroupAggregate, ParameterGroup};
pub use engine::{BootstrapStats, StatsEngine};
pub use export::{ExportManifest, ExportSystem};
pub use survival::SurvivalRecord;
