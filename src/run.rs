//! Run driver: one engine, one mode, from a master state until extinction
//! or the tick budget.
//!
//! Two independent observers watch the tick stream: a fixed measurement
//! window `[burn_in, burn_in + measure_ticks)` and a bounded trailing window
//! over the last `tail_ticks` ticks.

use crate::analysis::survival::SurvivalRecord;
use crate::checkpoint::WorldState;
use crate::config::{RunConfig, SimConfig};
use crate::error::{Result, SimError};
use crate::stats::EngineStepStats;
use crate::world::{FieldSnapshot, Mode, World};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Values the windows average, taken from one tick
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickSample {
    pub sigma_total: f64,
    pub sigma_diff: f64,
    pub sigma_behav: f64,
    pub population: f64,
    pub uptake: f64,
    pub agent_expenditure: f64,
    pub efficiency: f64,
}

impl From<&EngineStepStats> for TickSample {
    fn from(stats: &EngineStepStats) -> Self {
        Self {
            sigma_total: stats.sigma_total,
            sigma_diff: stats.sigma_diff,
            sigma_behav: stats.sigma_behav,
            population: stats.population as f64,
            uptake: stats.uptake,
            agent_expenditure: stats.behavioral_outflow,
            efficiency: stats.efficiency,
        }
    }
}

/// Means over the ticks a window saw
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMeans {
    pub ticks: u64,
    pub sigma_total: f64,
    pub sigma_diff: f64,
    pub sigma_behav: f64,
    pub population: f64,
    pub uptake: f64,
    pub agent_expenditure: f64,
    pub efficiency: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct WindowSums {
    ticks: u64,
    sum: TickSample,
}

impl WindowSums {
    fn push(&mut self, sample: &TickSample) {
        self.ticks += 1;
        self.sum.sigma_total += sample.sigma_total;
        self.sum.sigma_diff += sample.sigma_diff;
        self.sum.sigma_behav += sample.sigma_behav;
        self.sum.population += sample.population;
        self.sum.uptake += sample.uptake;
        self.sum.agent_expenditure += sample.agent_expenditure;
        self.sum.efficiency += sample.efficiency;
    }

    fn means(&self) -> Option<WindowMeans> {
        if self.ticks == 0 {
            return None;
        }
        let n = self.ticks as f64;
        Some(WindowMeans {
            ticks: self.ticks,
            sigma_total: self.sum.sigma_total / n,
            sigma_diff: self.sum.sigma_diff / n,
            sigma_behav: self.sum.sigma_behav / n,
            population: self.sum.population / n,
            uptake: self.sum.uptake / n,
            agent_expenditure: self.sum.agent_expenditure / n,
            efficiency: self.sum.efficiency / n,
        })
    }
}

/// Sliding window over the most recent ticks
#[derive(Clone, Debug)]
pub struct TailWindow {
    capacity: usize,
    samples: VecDeque<TickSample>,
}

impl TailWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: TickSample) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn means(&self) -> Option<WindowMeans> {
        let mut sums = WindowSums::default();
        for sample in &self.samples {
            sums.push(sample);
        }
        sums.means()
    }
}

/// Fixed measurement window over zero-based tick indices
#[derive(Clone, Debug)]
pub struct MeasureWindow {
    start: u64,
    end: u64,
    sums: WindowSums,
}

impl MeasureWindow {
    pub fn new(burn_in: u64, measure_ticks: u64) -> Self {
        Self {
            start: burn_in,
            end: burn_in.saturating_add(measure_ticks),
            sums: WindowSums::default(),
        }
    }

    pub fn observe(&mut self, index: u64, sample: &TickSample) {
        if index >= self.start && index < self.end {
            self.sums.push(sample);
        }
    }

    pub fn means(&self) -> Option<WindowMeans> {
        self.sums.means()
    }
}

/// Per-run summary for one (mode, seed, parameter point)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub mode: Mode,
    pub seed: u64,
    pub inflow: f64,
    pub cost: f64,
    pub noise: f64,

    /// Terminal tick: extinction tick or the tick budget
    pub survival_ticks: u64,
    /// 1 = extinction, 0 = censored
    pub event: u8,

    pub sigma_proxy_cum: f64,
    pub sigma_proxy_diff_cum: f64,
    pub sigma_proxy_behav_cum: f64,
    pub agent_expenditure_cum: f64,

    pub uptake_cum: f64,
    pub maintenance_cost_cum: f64,
    pub info_cost_cum: f64,
    pub division_cost_cum: f64,
    pub inflow_cum: f64,
    pub physical_outflow_cum: f64,
    pub numerical_outflow_cum: f64,

    pub births_total: u64,
    pub deaths_total: u64,
    pub divisions_total: u64,
    pub rejected_total: u64,
    pub final_population: usize,
    pub peak_population: usize,
    pub max_abs_residual: f64,

    pub measure: Option<WindowMeans>,
    pub tail: Option<WindowMeans>,
}

impl RunSummary {
    /// Survival record for the paired comparison; `None` for `Mode::Off`
    pub fn survival_record(&self) -> Option<SurvivalRecord> {
        self.mode.group().map(|group| SurvivalRecord {
            time: self.survival_ticks,
            event: self.event,
            group,
            noise: self.noise,
            inflow: self.inflow,
            cost: self.cost,
            seed: self.seed,
        })
    }
}

/// Summary plus whatever snapshots were requested
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub snapshots: Vec<FieldSnapshot>,
}

/// Running sums over the whole run
#[derive(Clone, Debug)]
struct RunAccumulator {
    measure: MeasureWindow,
    tail: TailWindow,
    uptake: f64,
    maintenance: f64,
    info: f64,
    division: f64,
    inflow: f64,
    physical_outflow: f64,
    numerical_outflow: f64,
    births: u64,
    deaths: u64,
    divisions: u64,
    rejected: u64,
    peak_population: usize,
    max_abs_residual: f64,
}

impl RunAccumulator {
    fn new(run: &RunConfig, initial_population: usize) -> Self {
        Self {
            measure: MeasureWindow::new(run.burn_in, run.measure_ticks),
            tail: TailWindow::new(run.tail_ticks),
            uptake: 0.0,
            maintenance: 0.0,
            info: 0.0,
            division: 0.0,
            inflow: 0.0,
            physical_outflow: 0.0,
            numerical_outflow: 0.0,
            births: 0,
            deaths: 0,
            divisions: 0,
            rejected: 0,
            peak_population: initial_population,
            max_abs_residual: 0.0,
        }
    }

    fn observe(&mut self, stats: &EngineStepStats) {
        let sample = TickSample::from(stats);
        self.measure.observe(stats.tick - 1, &sample);
        self.tail.push(sample);

        self.uptake += stats.uptake;
        self.maintenance += stats.maintenance_cost;
        self.info += stats.info_cost;
        self.division += stats.division_cost;
        self.inflow += stats.inflow;
        self.physical_outflow += stats.physical_outflow;
        self.numerical_outflow += stats.numerical_outflow;
        self.births += stats.births as u64;
        self.deaths += stats.deaths as u64;
        self.divisions += stats.divisions as u64;
        self.rejected += stats.rejected_children as u64;
        self.peak_population = self.peak_population.max(stats.population);
        self.max_abs_residual = self.max_abs_residual.max(stats.energy_residual.abs());
    }
}

/// Fail unless `population_t = population_{t-1} + births - deaths`, the
/// population respects capacity and behavioral outflow equals the summed costs
pub fn check_contract(previous: usize, stats: &EngineStepStats, max_agents: usize) -> Result<()> {
    let expected = (previous + stats.births).checked_sub(stats.deaths);
    if expected != Some(stats.population) {
        return Err(SimError::Contract {
            tick: stats.tick,
            message: format!(
                "population {} != {} + {} births - {} deaths",
                stats.population, previous, stats.births, stats.deaths
            ),
        });
    }
    if stats.population > max_agents {
        return Err(SimError::Contract {
            tick: stats.tick,
            message: format!("population {} exceeds capacity {}", stats.population, max_agents),
        });
    }
    let costs = stats.costs_total();
    if (stats.behavioral_outflow - costs).abs() > 1e-12 * costs.abs().max(1.0) {
        return Err(SimError::Contract {
            tick: stats.tick,
            message: format!(
                "behavioral outflow {} != maintenance + info + division {}",
                stats.behavioral_outflow, costs
            ),
        });
    }
    Ok(())
}

/// Run one mode from `state`. `snapshot_ticks` selects ticks to capture;
/// tick 0 is the state before the first update.
pub fn run_mode(
    sim: &SimConfig,
    run: &RunConfig,
    state: WorldState,
    mode: Mode,
    snapshot_ticks: &[u64],
) -> Result<RunOutcome> {
    let mut world = World::from_state(sim.clone(), state)?;
    let started_with_agents = !world.is_extinct();
    let mut population = world.population();
    let mut acc = RunAccumulator::new(run, population);

    let mut snapshots = Vec::new();
    if snapshot_ticks.contains(&0) {
        snapshots.push(world.snapshot(mode));
    }

    let mut last = EngineStepStats::default();
    let mut survival_ticks = run.max_ticks;
    let mut event = 0;

    for _ in 0..run.max_ticks {
        let stats = world.update(mode)?;
        check_contract(population, &stats, sim.max_agents)?;
        log::trace!("{} {}", mode, stats.summary());
        population = stats.population;
        acc.observe(&stats);

        if snapshot_ticks.contains(&stats.tick) {
            snapshots.push(world.snapshot(mode));
        }

        let extinct = started_with_agents && stats.population == 0;
        let tick = stats.tick;
        last = stats;
        if extinct {
            survival_ticks = tick;
            event = 1;
            break;
        }
    }

    let summary = RunSummary {
        mode,
        seed: sim.seed,
        inflow: sim.inflow_rate,
        cost: sim.intelligence_cost,
        noise: sim.sensing_noise,
        survival_ticks,
        event,
        sigma_proxy_cum: last.sigma_total_cum,
        sigma_proxy_diff_cum: last.sigma_diff_cum,
        sigma_proxy_behav_cum: last.sigma_behav_cum,
        agent_expenditure_cum: last.agent_expenditure_cum,
        uptake_cum: acc.uptake,
        maintenance_cost_cum: acc.maintenance,
        info_cost_cum: acc.info,
        division_cost_cum: acc.division,
        inflow_cum: acc.inflow,
        physical_outflow_cum: acc.physical_outflow,
        numerical_outflow_cum: acc.numerical_outflow,
        births_total: acc.births,
        deaths_total: acc.deaths,
        divisions_total: acc.divisions,
        rejected_total: acc.rejected,
        final_population: population,
        peak_population: acc.peak_population,
        max_abs_residual: acc.max_abs_residual,
        measure: acc.measure.means(),
        tail: acc.tail.means(),
    };

    log::debug!(
        "{} seed {} finished at tick {} (event {}), sigma cum {:.4}",
        mode,
        sim.seed,
        summary.survival_ticks,
        summary.event,
        summary.sigma_proxy_cum
    );

    Ok(RunOutcome { summary, snapshots })
}
