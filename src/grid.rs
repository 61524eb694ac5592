//! Resource lattice: diffusion, clipping and boundary removal.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How the lattice edge treats resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Perimeter cells are drained to zero every tick
    Isothermal,
    /// No forced removal; no flux leaves the lattice
    Open,
    /// Like `Open` for the field; agents bounce off the walls
    Reflect,
}

impl BoundaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isothermal => "isothermal",
            Self::Open => "open",
            Self::Reflect => "reflect",
        }
    }
}

/// Square lattice of a diffusible, non-negative resource.
/// `values[[y, x]]` holds the cell at column x, row y.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    grid_size: usize,
    values: Array2<f64>,
}

impl Field {
    /// Create an empty field
    pub fn new(grid_size: usize) -> Self {
        Self::uniform(grid_size, 0.0)
    }

    /// Create a field with every cell set to `level`
    pub fn uniform(grid_size: usize, level: f64) -> Self {
        Self {
            grid_size,
            values: Array2::from_elem((grid_size, grid_size), level),
        }
    }

    /// Get grid size
    #[inline]
    pub fn size(&self) -> usize {
        self.grid_size
    }

    /// Raw cell values
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Center cell coordinates
    #[inline]
    pub fn center(&self) -> (usize, usize) {
        (self.grid_size / 2, self.grid_size / 2)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[[y, x]]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        self.values[[y, x]] = value;
    }

    #[inline]
    pub fn add(&mut self, x: usize, y: usize, amount: f64) {
        self.values[[y, x]] += amount;
    }

    /// Sample with coordinates clamped onto the lattice
    #[inline]
    pub fn sample(&self, x: i64, y: i64) -> f64 {
        let max = self.grid_size as i64 - 1;
        self.get(x.clamp(0, max) as usize, y.clamp(0, max) as usize)
    }

    /// Remove up to `max_amount` from a cell, returns amount taken
    #[inline]
    pub fn withdraw(&mut self, x: usize, y: usize, max_amount: f64) -> f64 {
        let cell = &mut self.values[[y, x]];
        let taken = cell.max(0.0).min(max_amount);
        *cell -= taken;
        taken
    }

    /// Total resource in the lattice
    pub fn total(&self) -> f64 {
        self.values.sum()
    }

    /// One explicit diffusion step over every axis-aligned neighbour pair.
    ///
    /// Fluxes are computed from the pre-step values and written into a fresh
    /// buffer. Each pair accrues `kappa * du^2 * dt / t0`, split evenly between
    /// its two cells in `proxy_map`. Returns the tick's total diffusive proxy.
    pub fn diffuse(&mut self, kappa: f64, dt: f64, t0: f64, proxy_map: &mut Array2<f64>) -> f64 {
        let n = self.grid_size;
        let rate = kappa * dt;
        let old = &self.values;
        let mut next = old.clone();
        let mut total = 0.0;

        for y in 0..n {
            for x in 0..n {
                let u = old[[y, x]];
                let neighbours = [(x + 1, y), (x, y + 1)];
                for (nx, ny) in neighbours {
                    if nx >= n || ny >= n {
                        continue;
                    }
                    let du = u - old[[ny, nx]];
                    let flux = rate * du;
                    next[[y, x]] -= flux;
                    next[[ny, nx]] += flux;

                    let sigma = kappa * du * du * dt / t0;
                    proxy_map[[y, x]] += 0.5 * sigma;
                    proxy_map[[ny, nx]] += 0.5 * sigma;
                    total += sigma;
                }
            }
        }

        self.values = next;
        total
    }

    /// Zero negative cells, returns the clipped magnitude
    pub fn clip_negative(&mut self) -> f64 {
        let mut clipped = 0.0;
        for cell in self.values.iter_mut() {
            if *cell < 0.0 {
                clipped += -*cell;
                *cell = 0.0;
            }
        }
        clipped
    }

    /// Drain perimeter cells to zero, returns the amount removed
    pub fn drain_perimeter(&mut self) -> f64 {
        let n = self.grid_size;
        let mut drained = 0.0;
        for y in 0..n {
            for x in 0..n {
                if x == 0 || y == 0 || x == n - 1 || y == n - 1 {
                    drained += self.values[[y, x]];
                    self.values[[y, x]] = 0.0;
                }
            }
        }
        drained
    }
}
