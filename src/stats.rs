//! Per-tick statistics emitted by the engine.
//!
//! All `sigma_*` quantities are dissipation proxies derived from diffusive
//! flux and behavioral expenditure divided by the bath temperature. They are
//! not thermodynamic entropy production.

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};

/// Guard added to the efficiency denominator
pub const EFFICIENCY_EPSILON: f64 = 1e-12;

/// Complete statistics record for one tick
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStepStats {
    /// Ticks completed, including this one
    pub tick: u64,

    // Flows
    pub inflow: f64,
    pub physical_outflow: f64,
    /// Mass created by zeroing negative cells; diagnostic only
    pub numerical_outflow: f64,
    pub behavioral_outflow: f64,

    // Energy bookkeeping (field + agents)
    pub energy_prev: f64,
    pub energy_total: f64,
    pub delta_energy: f64,
    pub energy_residual: f64,
    pub field_mass: f64,
    pub agent_energy: f64,

    // Dissipation proxies, this tick
    pub sigma_diff: f64,
    pub sigma_behav: f64,
    pub sigma_total: f64,

    // Dissipation proxies, cumulative since the last state import
    pub sigma_diff_cum: f64,
    pub sigma_behav_cum: f64,
    pub sigma_total_cum: f64,

    // Cost decomposition
    pub uptake: f64,
    pub maintenance_cost: f64,
    pub info_cost: f64,
    pub division_cost: f64,
    pub agent_expenditure_cum: f64,

    // Demographics
    pub births: usize,
    pub deaths: usize,
    pub divisions: usize,
    pub rejected_children: usize,
    pub population: usize,

    pub distance_moved: f64,
    /// uptake / (info + maintenance + eps)
    pub efficiency: f64,
}

impl EngineStepStats {
    /// Named view of every floating-point field
    pub fn float_fields(&self) -> [(&'static str, f64); 23] {
        [
            ("inflow", self.inflow),
            ("physical_outflow", self.physical_outflow),
            ("numerical_outflow", self.numerical_outflow),
            ("behavioral_outflow", self.behavioral_outflow),
            ("energy_prev", self.energy_prev),
            ("energy_total", self.energy_total),
            ("delta_energy", self.delta_energy),
            ("energy_residual", self.energy_residual),
            ("field_mass", self.field_mass),
            ("agent_energy", self.agent_energy),
            ("sigma_diff", self.sigma_diff),
            ("sigma_behav", self.sigma_behav),
            ("sigma_total", self.sigma_total),
            ("sigma_diff_cum", self.sigma_diff_cum),
            ("sigma_behav_cum", self.sigma_behav_cum),
            ("sigma_total_cum", self.sigma_total_cum),
            ("uptake", self.uptake),
            ("maintenance_cost", self.maintenance_cost),
            ("info_cost", self.info_cost),
            ("division_cost", self.division_cost),
            ("agent_expenditure_cum", self.agent_expenditure_cum),
            ("distance_moved", self.distance_moved),
            ("efficiency", self.efficiency),
        ]
    }

    /// Maintenance + information + division cost this tick
    pub fn costs_total(&self) -> f64 {
        self.maintenance_cost + self.info_cost + self.division_cost
    }

    /// Fail on the first non-finite field, attaching the whole record
    pub fn ensure_finite(&self) -> Result<()> {
        for (field, value) in self.float_fields() {
            if !value.is_finite() {
                return Err(SimError::NonFinite {
                    tick: self.tick,
                    field,
                    stats: Box::new(self.clone()),
                });
            }
        }
        Ok(())
    }

    /// Format stats as a one-line summary
    pub fn summary(&self) -> String {
        format!(
            "T:{:6} | Pop:{:4} | B/D:{}/{} | Field:{:.3} | Agents:{:.3} | Sigma:{:.4} (cum {:.3}) | Res:{:+.2e}",
            self.tick,
            self.population,
            self.births,
            self.deaths,
            self.field_mass,
            self.agent_energy,
            self.sigma_total,
            self.sigma_total_cum,
            self.energy_residual,
        )
    }
}
