//! Simulation engine: one field, one agent population, one random stream.

use crate::agent::Agent;
use crate::checkpoint::WorldState;
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::grid::{BoundaryMode, Field};
use crate::rng::{SimRng, MASTER_STREAM, RUN_STREAM};
use crate::stats::{EngineStepStats, EFFICIENCY_EPSILON};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent behavior for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Field only; the agent step is skipped
    Off,
    /// Undirected Gaussian velocity kicks
    Random,
    /// Noisy gradient sensing, paid for with an information cost
    Informed,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Random => "random",
            Self::Informed => "informed",
        }
    }

    /// Survival group code (0 = random, 1 = informed)
    pub fn group(&self) -> Option<u8> {
        match self {
            Self::Off => None,
            Self::Random => Some(0),
            Self::Informed => Some(1),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "random" => Ok(Self::Random),
            "informed" => Ok(Self::Informed),
            other => Err(format!("unknown mode '{}' (expected off, random or informed)", other)),
        }
    }
}

/// Field, proxy maps and agents captured at one tick
#[derive(Clone, Debug, Serialize)]
pub struct FieldSnapshot {
    pub tick: u64,
    pub mode: Mode,
    pub field: Array2<f64>,
    /// Cumulative diffusive proxy per cell since the last import
    pub sigma_diff: Array2<f64>,
    /// Cumulative behavioral proxy per cell since the last import
    pub sigma_behav: Array2<f64>,
    pub agents: Vec<Agent>,
}

impl FieldSnapshot {
    pub fn sigma_total(&self) -> Array2<f64> {
        &self.sigma_diff + &self.sigma_behav
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Cumulative {
    sigma_diff: f64,
    sigma_behav: f64,
    agent_expenditure: f64,
}

/// Per-tick agent bookkeeping
#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    uptake: f64,
    maintenance: f64,
    info: f64,
    division: f64,
    births: usize,
    deaths: usize,
    divisions: usize,
    rejected: usize,
    distance: f64,
}

impl Tally {
    fn behavioral_outflow(&self) -> f64 {
        self.maintenance + self.info + self.division
    }
}

/// The simulation engine
pub struct World {
    pub config: SimConfig,
    pub field: Field,
    pub agents: Vec<Agent>,
    /// Ticks since construction or the last import
    pub time: u64,

    rng: SimRng,
    sigma_diff_map: Array2<f64>,
    sigma_behav_map: Array2<f64>,
    cumulative: Cumulative,
    energy_total: f64,
}

impl World {
    /// Build the master state for `config.seed`: a uniform field and
    /// `initial_agents` agents scattered around the center.
    pub fn master_state(config: &SimConfig) -> Result<WorldState> {
        config.validate()?;

        let mut rng = SimRng::with_stream(config.seed, MASTER_STREAM);
        let field = Field::uniform(config.grid_size, config.initial_field_level);
        let (cx, cy) = field.center();

        let agents = (0..config.initial_agents)
            .map(|_| {
                let x = cx as f64 + config.initial_spread * rng.gaussian();
                let y = cy as f64 + config.initial_spread * rng.gaussian();
                let mut agent = Agent::new(x, y, config.initial_energy);
                agent.clamp_into(config.grid_size);
                agent
            })
            .collect();

        Ok(WorldState::new(field, agents))
    }

    /// Create an engine from the master state of `config.seed`
    pub fn new(config: SimConfig) -> Result<Self> {
        let state = Self::master_state(&config)?;
        Self::from_state(config, state)
    }

    /// Create an engine from an existing state
    pub fn from_state(config: SimConfig, state: WorldState) -> Result<Self> {
        config.validate()?;
        let n = config.grid_size;
        let rng = SimRng::with_stream(config.seed, RUN_STREAM);

        let mut world = Self {
            config,
            field: Field::new(n),
            agents: Vec::new(),
            time: 0,
            rng,
            sigma_diff_map: Array2::zeros((n, n)),
            sigma_behav_map: Array2::zeros((n, n)),
            cumulative: Cumulative::default(),
            energy_total: 0.0,
        };
        world.import_state(state)?;

        Ok(world)
    }

    /// Copy out the field and agents
    pub fn export_state(&self) -> WorldState {
        WorldState::new(self.field.clone(), self.agents.clone())
    }

    /// Replace field and agents and start a fresh epoch: tick counter,
    /// cumulative counters and per-cell proxy maps are reset.
    pub fn import_state(&mut self, state: WorldState) -> Result<()> {
        let n = self.config.grid_size;
        if state.field.size() != n {
            return Err(SimError::InvalidConfig(format!(
                "state field is {}x{}, config expects {}x{}",
                state.field.size(),
                state.field.size(),
                n,
                n
            )));
        }
        state.validate()?;

        self.energy_total = state.total_energy();
        self.field = state.field;
        self.agents = state.agents;
        self.time = 0;
        self.sigma_diff_map.fill(0.0);
        self.sigma_behav_map.fill(0.0);
        self.cumulative = Cumulative::default();

        Ok(())
    }

    /// Advance field and agents by one tick
    pub fn update(&mut self, mode: Mode) -> Result<EngineStepStats> {
        self.config.check_stability()?;

        let dt = self.config.time_step;
        let kappa = self.config.diffusion_kappa;
        let t0 = self.config.bath_temperature;
        let energy_prev = self.energy_total;

        // Phase 1: inflow at the center
        let inflow = self.config.inflow_rate * dt;
        let (cx, cy) = self.field.center();
        self.field.add(cx, cy, inflow);

        // Phase 2: diffusion
        let sigma_diff = self.field.diffuse(kappa, dt, t0, &mut self.sigma_diff_map);

        // Phase 3: numerical clipping
        let numerical_outflow = self.field.clip_negative();

        // Phase 4: boundary
        let physical_outflow = match self.config.boundary_mode {
            BoundaryMode::Isothermal => self.field.drain_perimeter(),
            BoundaryMode::Open | BoundaryMode::Reflect => 0.0,
        };

        // Phase 5: agents
        let mut tally = Tally::default();
        if mode != Mode::Off {
            self.step_agents(mode, &mut tally);
        }

        // Phase 6: energy bookkeeping
        let field_mass = self.field.total();
        let agent_energy: f64 = self.agents.iter().map(|a| a.energy).sum();
        let energy_total = field_mass + agent_energy;
        let delta_energy = energy_total - energy_prev;
        let behavioral_outflow = tally.behavioral_outflow();
        let energy_residual =
            delta_energy - (inflow - physical_outflow - numerical_outflow - behavioral_outflow);

        // Phase 7: cumulative counters
        let sigma_behav = behavioral_outflow / t0;
        self.cumulative.sigma_diff += sigma_diff;
        self.cumulative.sigma_behav += sigma_behav;
        self.cumulative.agent_expenditure += behavioral_outflow;
        self.time += 1;

        let stats = EngineStepStats {
            tick: self.time,
            inflow,
            physical_outflow,
            numerical_outflow,
            behavioral_outflow,
            energy_prev,
            energy_total,
            delta_energy,
            energy_residual,
            field_mass,
            agent_energy,
            sigma_diff,
            sigma_behav,
            sigma_total: sigma_diff + sigma_behav,
            sigma_diff_cum: self.cumulative.sigma_diff,
            sigma_behav_cum: self.cumulative.sigma_behav,
            sigma_total_cum: self.cumulative.sigma_diff + self.cumulative.sigma_behav,
            uptake: tally.uptake,
            maintenance_cost: tally.maintenance,
            info_cost: tally.info,
            division_cost: tally.division,
            agent_expenditure_cum: self.cumulative.agent_expenditure,
            births: tally.births,
            deaths: tally.deaths,
            divisions: tally.divisions,
            rejected_children: tally.rejected,
            population: self.agents.len(),
            distance_moved: tally.distance,
            efficiency: tally.uptake / (tally.info + tally.maintenance + EFFICIENCY_EPSILON),
        };
        stats.ensure_finite()?;

        self.energy_total = energy_total;
        Ok(stats)
    }

    /// Uptake, costs, movement, death and division, in population order
    fn step_agents(&mut self, mode: Mode, tally: &mut Tally) {
        let cfg = &self.config;
        let n = cfg.grid_size;
        let dt = cfg.time_step;
        let t0 = cfg.bath_temperature;
        let damping = cfg.friction.powf(dt);

        let agents = std::mem::take(&mut self.agents);
        let total = agents.len();
        let mut next = Vec::with_capacity(total + total / 4);

        for (i, mut agent) in agents.into_iter().enumerate() {
            let remaining = total - i - 1;

            agent.clamp_into(n);
            let (ax, ay) = agent.cell(n);

            let taken = self.field.withdraw(ax, ay, cfg.consumption_rate * dt);
            agent.energy += taken;
            tally.uptake += taken;

            let paid = agent.pay(cfg.maintenance_cost * dt);
            tally.maintenance += paid;
            self.sigma_behav_map[[ay, ax]] += paid / t0;

            match mode {
                Mode::Informed => {
                    let (gx, gy) = sense_gradient(&self.field, &mut self.rng, cfg, &agent);
                    agent.vx += cfg.gradient_gain * gx * dt;
                    agent.vy += cfg.gradient_gain * gy * dt;

                    let cost = (gx.abs() + gy.abs()) * cfg.intelligence_cost * dt
                        + cfg.info_base_cost * dt;
                    let paid = agent.pay(cost);
                    tally.info += paid;
                    self.sigma_behav_map[[ay, ax]] += paid / t0;
                }
                Mode::Random => {
                    agent.vx += cfg.random_kick * self.rng.gaussian() * dt;
                    agent.vy += cfg.random_kick * self.rng.gaussian() * dt;
                }
                Mode::Off => {}
            }

            // Movement
            let (x0, y0) = (agent.x, agent.y);
            agent.x += agent.vx * dt;
            agent.y += agent.vy * dt;
            let (hit_x, hit_y) = agent.clamp_into(n);
            if cfg.boundary_mode == BoundaryMode::Reflect {
                if hit_x {
                    agent.vx = -agent.vx;
                }
                if hit_y {
                    agent.vy = -agent.vy;
                }
            }
            agent.vx *= damping;
            agent.vy *= damping;
            tally.distance += (agent.x - x0).hypot(agent.y - y0);

            if !agent.is_alive() {
                tally.deaths += 1;
                continue;
            }

            if agent.energy >= cfg.division_threshold && next.len() < cfg.max_agents {
                let (px, py) = agent.cell(n);
                let paid = agent.pay(cfg.division_cost);
                tally.division += paid;
                self.sigma_behav_map[[py, px]] += paid / t0;

                if !agent.is_alive() {
                    tally.deaths += 1;
                    continue;
                }

                tally.divisions += 1;
                let jx = cfg.division_jitter * self.rng.gaussian();
                let jy = cfg.division_jitter * self.rng.gaussian();
                let half = agent.energy / 2.0;

                let mut first = Agent {
                    x: agent.x + jx,
                    y: agent.y + jy,
                    vx: agent.vx,
                    vy: agent.vy,
                    energy: half,
                };
                let mut second = Agent {
                    x: agent.x - jx,
                    y: agent.y - jy,
                    vx: -agent.vx,
                    vy: -agent.vy,
                    energy: agent.energy - half,
                };
                first.clamp_into(n);
                second.clamp_into(n);

                next.push(first);
                // The first child takes the parent's slot; the second needs a
                // free one after every not-yet-processed agent is counted.
                if next.len() + remaining < cfg.max_agents {
                    next.push(second);
                    tally.births += 1;
                } else {
                    tally.rejected += 1;
                    let (sx, sy) = second.cell(n);
                    self.field.add(sx, sy, second.energy);
                }
                continue;
            }

            next.push(agent);
        }

        self.agents = next;
    }

    /// Capture field, proxy maps and agents
    pub fn snapshot(&self, mode: Mode) -> FieldSnapshot {
        FieldSnapshot {
            tick: self.time,
            mode,
            field: self.field.values().clone(),
            sigma_diff: self.sigma_diff_map.clone(),
            sigma_behav: self.sigma_behav_map.clone(),
            agents: self.agents.clone(),
        }
    }

    /// Get current population count
    pub fn population(&self) -> usize {
        self.agents.len()
    }

    /// Check if population is extinct
    pub fn is_extinct(&self) -> bool {
        self.agents.is_empty()
    }

    /// Field mass plus agent energy after the last tick
    pub fn total_energy(&self) -> f64 {
        self.energy_total
    }

    pub fn sigma_diff_map(&self) -> &Array2<f64> {
        &self.sigma_diff_map
    }

    pub fn sigma_behav_map(&self) -> &Array2<f64> {
        &self.sigma_behav_map
    }
}

/// Central-difference gradient from four noisy probes at +-lookDistance
fn sense_gradient(field: &Field, rng: &mut SimRng, cfg: &SimConfig, agent: &Agent) -> (f64, f64) {
    let reach = cfg.look_distance as i64;
    let (ax, ay) = agent.cell(cfg.grid_size);
    let (ax, ay) = (ax as i64, ay as i64);

    let mut probe = |dx: i64, dy: i64| {
        let value = field.sample(ax + dx, ay + dy) + cfg.sensing_noise * rng.gaussian();
        if cfg.clamp_sensing {
            value.max(0.0)
        } else {
            value
        }
    };

    let east = probe(reach, 0);
    let west = probe(-reach, 0);
    let south = probe(0, reach);
    let north = probe(0, -reach);
    let span = 2.0 * reach as f64;

    ((east - west) / span, (south - north) / span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SimConfig {
        SimConfig {
            grid_size: 21,
            initial_agents: 10,
            max_agents: 200,
            seed: 17,
            ..Default::default()
        }
    }

    fn residual_tolerance(stats: &EngineStepStats) -> f64 {
        1e-9 * stats.energy_total.abs().max(1.0)
    }

    #[test]
    fn test_world_creation() {
        let config = test_config();
        let world = World::new(config.clone()).unwrap();

        assert_eq!(world.population(), config.initial_agents);
        assert_eq!(world.time, 0);
        assert!((world.total_energy() - config.initial_agents as f64 * config.initial_energy).abs() < 1e-12);
    }

    #[test]
    fn test_master_state_depends_on_seed() {
        let config = test_config();
        let a = World::master_state(&config).unwrap();
        let b = World::master_state(&config).unwrap();
        assert_eq!(a, b);

        let other = SimConfig { seed: 18, ..config };
        let c = World::master_state(&other).unwrap();
        assert_ne!(a.agents, c.agents);
    }

    #[test]
    fn test_pure_diffusion_conserves_energy() {
        let config = SimConfig {
            initial_agents: 0,
            ..test_config()
        };
        let mut world = World::new(config).unwrap();

        for _ in 0..300 {
            let stats = world.update(Mode::Random).unwrap();
            assert!(stats.energy_residual.abs() < residual_tolerance(&stats));
            assert_eq!(stats.births, 0);
            assert_eq!(stats.deaths, 0);
            assert_eq!(stats.numerical_outflow, 0.0);
        }
    }

    #[test]
    fn test_agents_conserve_energy() {
        let config = SimConfig {
            sensing_noise: 0.05,
            ..test_config()
        };
        for mode in [Mode::Random, Mode::Informed] {
            let mut world = World::new(config.clone()).unwrap();
            for _ in 0..300 {
                let stats = world.update(mode).unwrap();
                assert!(
                    stats.energy_residual.abs() < residual_tolerance(&stats),
                    "{} residual {} at tick {}",
                    mode,
                    stats.energy_residual,
                    stats.tick
                );
            }
        }
    }

    #[test]
    fn test_determinism() {
        let config = SimConfig {
            sensing_noise: 0.1,
            ..test_config()
        };
        let mut a = World::new(config.clone()).unwrap();
        let mut b = World::new(config).unwrap();

        for _ in 0..200 {
            assert_eq!(a.update(Mode::Informed).unwrap(), b.update(Mode::Informed).unwrap());
        }
        assert_eq!(a.agents, b.agents);
    }

    #[test]
    fn test_proxies_non_negative_and_cumulative_monotone() {
        let mut world = World::new(test_config()).unwrap();
        let mut last = EngineStepStats::default();

        for _ in 0..200 {
            let stats = world.update(Mode::Informed).unwrap();
            assert!(stats.sigma_diff >= 0.0);
            assert!(stats.sigma_behav >= 0.0);
            assert!(stats.sigma_diff_cum >= last.sigma_diff_cum);
            assert!(stats.sigma_behav_cum >= last.sigma_behav_cum);
            assert!(stats.sigma_total_cum >= last.sigma_total_cum);
            assert!(stats.agent_expenditure_cum >= last.agent_expenditure_cum);
            assert!(stats.distance_moved >= 0.0);
            last = stats;
        }
    }

    #[test]
    fn test_population_accounting() {
        let config = SimConfig {
            division_threshold: 1.05,
            division_cost: 0.01,
            ..test_config()
        };
        let mut world = World::new(config).unwrap();
        let mut population = world.population();

        for _ in 0..300 {
            let stats = world.update(Mode::Random).unwrap();
            assert_eq!(stats.population, population + stats.births - stats.deaths);
            assert!(stats.population <= world.config.max_agents);
            population = stats.population;
        }
    }

    #[test]
    fn test_off_mode_freezes_agents() {
        let mut world = World::new(test_config()).unwrap();
        let before = world.agents.clone();

        for _ in 0..10 {
            let stats = world.update(Mode::Off).unwrap();
            assert_eq!(stats.sigma_behav, 0.0);
            assert_eq!(stats.uptake, 0.0);
        }
        assert_eq!(world.agents, before);
    }

    #[test]
    fn test_capacity_rejects_second_child() {
        let config = SimConfig {
            initial_agents: 1,
            max_agents: 1,
            division_threshold: 0.0,
            division_cost: 0.0,
            ..test_config()
        };
        let mut world = World::new(config).unwrap();
        let stats = world.update(Mode::Random).unwrap();

        assert_eq!(stats.divisions, 1);
        assert_eq!(stats.rejected_children, 1);
        assert_eq!(stats.births, 0);
        assert_eq!(stats.population, 1);
        assert!(stats.energy_residual.abs() < residual_tolerance(&stats));
    }

    #[test]
    fn test_unstable_update_fails() {
        let mut world = World::new(test_config()).unwrap();
        world.config.diffusion_kappa = 0.5;

        assert!(matches!(world.update(Mode::Random), Err(SimError::Unstable { .. })));
    }

    #[test]
    fn test_non_finite_is_fatal() {
        let mut world = World::new(test_config()).unwrap();
        world.config.inflow_rate = f64::INFINITY;

        match world.update(Mode::Random) {
            Err(SimError::NonFinite { field, .. }) => assert_eq!(field, "inflow"),
            other => panic!("expected NonFinite, got {:?}", other.map(|s| s.tick)),
        }
    }

    #[test]
    fn test_import_state_resets_counters() {
        let mut world = World::new(test_config()).unwrap();
        for _ in 0..20 {
            world.update(Mode::Informed).unwrap();
        }
        assert!(world.sigma_diff_map().sum() > 0.0);

        let state = world.export_state();
        world.import_state(state).unwrap();
        assert_eq!(world.time, 0);
        assert_eq!(world.sigma_diff_map().sum(), 0.0);
        assert_eq!(world.sigma_behav_map().sum(), 0.0);

        let stats = world.update(Mode::Informed).unwrap();
        assert_eq!(stats.tick, 1);
        assert_eq!(stats.sigma_diff_cum, stats.sigma_diff);
        assert_eq!(stats.sigma_behav_cum, stats.sigma_behav);
    }

    #[test]
    fn test_import_rejects_wrong_size() {
        let mut world = World::new(test_config()).unwrap();
        let state = WorldState::new(Field::new(5), Vec::new());
        assert!(world.import_state(state).is_err());
    }

    #[test]
    fn test_import_rejects_misshapen_field() {
        let config = SimConfig {
            grid_size: 5,
            initial_agents: 0,
            ..test_config()
        };
        let field: Field =
            serde_json::from_str(r#"{"grid_size":5,"values":{"v":1,"dim":[3,3],"data":[0,0,0,0,0,0,0,0,0]}}"#)
                .unwrap();

        let result = World::from_state(config.clone(), WorldState::new(field, Vec::new()));
        assert!(matches!(result, Err(SimError::Checkpoint(_))));

        // The engine is left untouched and keeps stepping
        let mut world = World::new(config).unwrap();
        let mut field = Field::new(5);
        field.set(2, 2, f64::INFINITY);
        assert!(world.import_state(WorldState::new(field, Vec::new())).is_err());
        assert!(world.update(Mode::Random).is_ok());
    }

    #[test]
    fn test_boundary_modes() {
        let base = SimConfig {
            grid_size: 7,
            initial_agents: 0,
            diffusion_kappa: 0.25,
            ..test_config()
        };

        let mut open = World::new(SimConfig {
            boundary_mode: BoundaryMode::Open,
            ..base.clone()
        })
        .unwrap();
        let mut isothermal = World::new(SimConfig {
            boundary_mode: BoundaryMode::Isothermal,
            ..base
        })
        .unwrap();

        let mut drained = 0.0;
        for _ in 0..100 {
            let o = open.update(Mode::Random).unwrap();
            let i = isothermal.update(Mode::Random).unwrap();
            assert_eq!(o.physical_outflow, 0.0);
            drained += i.physical_outflow;
        }

        assert!((open.field.total() - 100.0 * 0.1).abs() < 1e-9);
        assert!(drained > 0.0);
        assert!(isothermal.field.total() < open.field.total());
    }

    #[test]
    fn test_reflect_bounces_agents() {
        let base = SimConfig {
            grid_size: 21,
            initial_agents: 0,
            random_kick: 0.0,
            maintenance_cost: 0.0,
            inflow_rate: 0.0,
            ..test_config()
        };
        let mut walker = Agent::new(19.9, 10.0, 1.0);
        walker.vx = 2.0;
        let state = WorldState::new(Field::new(21), vec![walker]);

        let mut reflect = World::from_state(
            SimConfig {
                boundary_mode: BoundaryMode::Reflect,
                ..base.clone()
            },
            state.clone(),
        )
        .unwrap();
        let mut open = World::from_state(
            SimConfig {
                boundary_mode: BoundaryMode::Open,
                ..base
            },
            state,
        )
        .unwrap();

        reflect.update(Mode::Random).unwrap();
        open.update(Mode::Random).unwrap();

        assert_eq!(reflect.agents[0].x, 20.0);
        assert!(reflect.agents[0].vx < 0.0);
        assert!(open.agents[0].vx > 0.0);
    }

    #[test]
    fn test_informed_climbs_gradient() {
        let config = SimConfig {
            grid_size: 21,
            initial_agents: 0,
            inflow_rate: 0.0,
            maintenance_cost: 0.0,
            ..test_config()
        };
        let mut field = Field::new(21);
        for x in 0..21 {
            for y in 0..21 {
                field.set(x, y, x as f64);
            }
        }
        let state = WorldState::new(field, vec![Agent::new(10.0, 10.0, 5.0)]);
        let mut world = World::from_state(config, state).unwrap();

        let stats = world.update(Mode::Informed).unwrap();

        assert!(world.agents[0].vx > 0.0);
        assert!(stats.info_cost > 0.0);
    }

    #[test]
    fn test_snapshot_shapes() {
        let mut world = World::new(test_config()).unwrap();
        world.update(Mode::Informed).unwrap();
        let snapshot = world.snapshot(Mode::Informed);

        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.field.dim(), (21, 21));
        assert_eq!(snapshot.agents.len(), world.population());
        let total = snapshot.sigma_total();
        assert!((total.sum() - snapshot.sigma_diff.sum() - snapshot.sigma_behav.sum()).abs() < 1e-12);
    }
}
