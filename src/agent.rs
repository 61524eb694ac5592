//! Agent structure and per-agent bookkeeping.

use serde::{Deserialize, Serialize};

/// A forager on the lattice
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Continuous lattice coordinates
    pub x: f64,
    pub y: f64,
    /// Velocity
    pub vx: f64,
    pub vy: f64,
    /// Stored energy; the agent dies once this reaches zero
    pub energy: f64,
}

impl Agent {
    /// Create a resting agent
    pub fn new(x: f64, y: f64, energy: f64) -> Self {
        Self {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            energy,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.energy > 0.0
    }

    /// Clamp position into `[0, grid_size - 1]`. Returns which axes were
    /// clamped as (x, y).
    pub fn clamp_into(&mut self, grid_size: usize) -> (bool, bool) {
        let max = (grid_size - 1) as f64;
        let cx = self.x.clamp(0.0, max);
        let cy = self.y.clamp(0.0, max);
        let clamped = (cx != self.x, cy != self.y);
        self.x = cx;
        self.y = cy;
        clamped
    }

    /// Lattice cell occupied by the agent
    #[inline]
    pub fn cell(&self, grid_size: usize) -> (usize, usize) {
        let max = (grid_size - 1) as f64;
        (
            self.x.round().clamp(0.0, max) as usize,
            self.y.round().clamp(0.0, max) as usize,
        )
    }

    /// Deduct `cost` from energy. Returns the part actually covered by
    /// remaining positive energy, so an overdrawn agent only dissipates what
    /// it had.
    #[inline]
    pub fn pay(&mut self, cost: f64) -> f64 {
        let paid = cost.min(self.energy.max(0.0));
        self.energy -= cost;
        paid
    }
}
