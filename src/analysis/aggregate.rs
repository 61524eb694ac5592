//! Paired aggregation of sweep results by parameter point.
//!
//! Runs are grouped by (noise, inflow, cost). Within a group every seed
//! contributes one (random, informed) pair; paired metrics are summarised as
//! informed minus random differences with bootstrap intervals, and the
//! survival records feed Kaplan–Meier RMST, Hedges' g and the log-rank test.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::bootstrap::ConfidenceInterval;
use super::engine::{BootstrapStats, StatsEngine};
use super::survival::{LogRankResult, SurvivalRecord};
use crate::config::{Config, StatsConfig};
use crate::error::{Result, SimError};
use crate::rng::{SimRng, BOOTSTRAP_STREAM};
use crate::run::RunSummary;
use crate::sweep::JobResult;

/// A paired per-run metric
pub struct Metric {
    /// Column stem, e.g. `sigmaProxyCumEnd`
    pub name: &'static str,
    /// Suffix of the interval columns, e.g. `ciLo_d<suffix>`
    pub ci_suffix: &'static str,
    pub extract: fn(&RunSummary) -> Option<f64>,
}

pub const METRICS: [Metric; 9] = [
    Metric {
        name: "sigmaProxyCumEnd",
        ci_suffix: "SigmaProxyCumEnd",
        extract: |s| Some(s.sigma_proxy_cum),
    },
    Metric {
        name: "sigmaProxyDiffCumEnd",
        ci_suffix: "SigmaProxyDiffCumEnd",
        extract: |s| Some(s.sigma_proxy_diff_cum),
    },
    Metric {
        name: "sigmaProxyBehavCumEnd",
        ci_suffix: "SigmaProxyBehavCumEnd",
        extract: |s| Some(s.sigma_proxy_behav_cum),
    },
    Metric {
        name: "agentExpenditureCum",
        ci_suffix: "AgentExpendCum",
        extract: |s| Some(s.agent_expenditure_cum),
    },
    Metric {
        name: "uptakeCum",
        ci_suffix: "UptakeCum",
        extract: |s| Some(s.uptake_cum),
    },
    Metric {
        name: "survivalTicks",
        ci_suffix: "SurvivalTicks",
        extract: |s| Some(s.survival_ticks as f64),
    },
    Metric {
        name: "sigmaProxyMeasureMean",
        ci_suffix: "SigmaProxyMeasureMean",
        extract: |s| s.measure.map(|m| m.sigma_total),
    },
    Metric {
        name: "populationMeasureMean",
        ci_suffix: "PopulationMeasureMean",
        extract: |s| s.measure.map(|m| m.population),
    },
    Metric {
        name: "sigmaProxyTailMean",
        ci_suffix: "SigmaProxyTailMean",
        extract: |s| s.tail.map(|m| m.sigma_total),
    },
];

/// Both summaries of one seed at one parameter point
#[derive(Clone, Debug, PartialEq)]
pub struct PairedRun {
    pub seed: u64,
    pub random: RunSummary,
    pub informed: RunSummary,
}

/// Pairs sharing (noise, inflow, cost)
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterGroup {
    pub key: String,
    pub noise: f64,
    pub inflow: f64,
    pub cost: f64,
    pub pairs: Vec<PairedRun>,
}

impl ParameterGroup {
    pub fn survival_records(&self) -> (Vec<SurvivalRecord>, Vec<SurvivalRecord>) {
        let random = self.pairs.iter().filter_map(|p| p.random.survival_record()).collect();
        let informed = self.pairs.iter().filter_map(|p| p.informed.survival_record()).collect();
        (random, informed)
    }
}

/// Stable fixed-precision key for a parameter point
pub fn group_key(noise: f64, inflow: f64, cost: f64) -> String {
    format!("{:.6}|{:.6}|{:.6}", noise, inflow, cost)
}

/// Group results by parameter point, in first-seen order
pub fn group_results(results: &[JobResult]) -> Vec<ParameterGroup> {
    let mut groups: Vec<ParameterGroup> = Vec::new();
    for result in results {
        let job = &result.job;
        let key = group_key(job.noise, job.inflow, job.cost);
        let pair = PairedRun {
            seed: job.seed,
            random: result.random.summary.clone(),
            informed: result.informed.summary.clone(),
        };

        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.pairs.push(pair),
            None => groups.push(ParameterGroup {
                key,
                noise: job.noise,
                inflow: job.inflow,
                cost: job.cost,
                pairs: vec![pair],
            }),
        }
    }
    groups
}

/// Informed minus random summary of one metric
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricDiff {
    /// Pairs where both arms have a value
    pub n: usize,
    pub mean_diff: f64,
    pub sd_diff: f64,
    pub ci: ConfidenceInterval,
    pub mean_random: f64,
    pub mean_informed: f64,
}

/// Everything reported for one parameter point
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub key: String,
    pub noise: f64,
    pub inflow: f64,
    pub cost: f64,
    pub n_pairs: usize,
    /// Aligned with `METRICS`; `None` when no pair had both values
    pub metrics: Vec<Option<MetricDiff>>,
    pub rmst_random: f64,
    pub rmst_informed: f64,
    pub d_rmst: f64,
    pub d_rmst_ci: Option<ConfidenceInterval>,
    pub hedges_g: Option<f64>,
    pub log_rank: LogRankResult,
    pub events_random: usize,
    pub events_informed: usize,
    /// RMST truncation time
    pub horizon: f64,
}

impl GroupAggregate {
    /// Lookup by metric name
    pub fn metric(&self, name: &str) -> Option<&MetricDiff> {
        METRICS
            .iter()
            .position(|m| m.name == name)
            .and_then(|i| self.metrics.get(i))
            .and_then(Option::as_ref)
    }
}

/// 64-bit FNV-1a
fn fnv1a(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    text.bytes().fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

/// Bootstrap source for one group, independent of thread scheduling
fn group_rng(base_seed: u64, key: &str) -> SimRng {
    SimRng::with_stream(base_seed ^ fnv1a(key), BOOTSTRAP_STREAM)
}

fn metric_diff<E: StatsEngine>(
    engine: &E,
    pairs: &[PairedRun],
    metric: &Metric,
    rng: &mut SimRng,
) -> Option<MetricDiff> {
    let mut diffs = Vec::with_capacity(pairs.len());
    let mut random = Vec::with_capacity(pairs.len());
    let mut informed = Vec::with_capacity(pairs.len());
    for pair in pairs {
        if let (Some(r), Some(i)) = ((metric.extract)(&pair.random), (metric.extract)(&pair.informed)) {
            diffs.push(i - r);
            random.push(r);
            informed.push(i);
        }
    }

    let ci = engine.bootstrap_ci(&diffs, rng)?;
    Some(MetricDiff {
        n: diffs.len(),
        mean_diff: engine.mean(&diffs),
        sd_diff: engine.sd(&diffs),
        ci,
        mean_random: engine.mean(&random),
        mean_informed: engine.mean(&informed),
    })
}

/// Aggregate one group with an explicit engine and bootstrap source
pub fn aggregate_group<E: StatsEngine>(
    group: &ParameterGroup,
    engine: &E,
    rng: &mut SimRng,
    horizon: f64,
) -> Result<GroupAggregate> {
    let (random, informed) = group.survival_records();
    if random.is_empty() {
        return Err(SimError::EmptyGroup {
            key: group.key.clone(),
            arm: "random",
        });
    }
    if informed.is_empty() {
        return Err(SimError::EmptyGroup {
            key: group.key.clone(),
            arm: "informed",
        });
    }
    if group.pairs.len() < 2 {
        log::warn!("Group {} has a single pair; intervals are degenerate", group.key);
    }

    let metrics = METRICS
        .iter()
        .map(|metric| metric_diff(engine, &group.pairs, metric, rng))
        .collect();

    let rmst_random = engine.rmst_km(&random, horizon);
    let rmst_informed = engine.rmst_km(&informed, horizon);
    let d_rmst_ci = engine.bootstrap_rmst_diff_ci(&random, &informed, horizon, rng);

    let times = |records: &[SurvivalRecord]| records.iter().map(|r| r.time as f64).collect::<Vec<_>>();
    let hedges_g = engine.hedges_g(&times(&random), &times(&informed));

    Ok(GroupAggregate {
        key: group.key.clone(),
        noise: group.noise,
        inflow: group.inflow,
        cost: group.cost,
        n_pairs: group.pairs.len(),
        metrics,
        rmst_random,
        rmst_informed,
        d_rmst: rmst_informed - rmst_random,
        d_rmst_ci,
        hedges_g,
        log_rank: engine.log_rank_test(&random, &informed),
        events_random: random.iter().filter(|r| r.is_event()).count(),
        events_informed: informed.iter().filter(|r| r.is_event()).count(),
        horizon,
    })
}

/// Aggregate every group in parallel; output follows group order
pub fn aggregate_groups(groups: &[ParameterGroup], stats: &StatsConfig, horizon: f64) -> Result<Vec<GroupAggregate>> {
    let engine = BootstrapStats::from_config(stats);
    groups
        .par_iter()
        .map(|group| {
            let mut rng = group_rng(stats.seed, &group.key);
            aggregate_group(group, &engine, &mut rng, horizon)
        })
        .collect()
}

/// Group and aggregate sweep results, with RMST truncated at `maxTicks`
pub fn aggregate_results(results: &[JobResult], config: &Config) -> Result<Vec<GroupAggregate>> {
    let groups = group_results(results);
    aggregate_groups(&groups, &config.stats, config.run.max_ticks as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{RunOutcome, WindowMeans};
    use crate::sweep::Job;
    use crate::world::Mode;

    fn summary(mode: Mode, seed: u64, time: u64, event: u8, sigma: f64) -> RunSummary {
        RunSummary {
            mode,
            seed,
            inflow: 0.1,
            cost: 0.02,
            noise: 0.0,
            survival_ticks: time,
            event,
            sigma_proxy_cum: sigma,
            sigma_proxy_diff_cum: sigma * 0.75,
            sigma_proxy_behav_cum: sigma * 0.25,
            agent_expenditure_cum: 1.0,
            uptake_cum: 2.0,
            maintenance_cost_cum: 0.5,
            info_cost_cum: 0.4,
            division_cost_cum: 0.1,
            inflow_cum: 10.0,
            physical_outflow_cum: 7.0,
            numerical_outflow_cum: 0.0,
            births_total: 0,
            deaths_total: 0,
            divisions_total: 0,
            rejected_total: 0,
            final_population: 0,
            peak_population: 5,
            max_abs_residual: 0.0,
            measure: None,
            tail: Some(WindowMeans {
                ticks: 3,
                sigma_total: sigma / 10.0,
                ..Default::default()
            }),
        }
    }

    fn job_result(id: usize, inflow: f64, seed: u64, random: RunSummary, informed: RunSummary) -> JobResult {
        JobResult {
            job: Job {
                id,
                noise: 0.0,
                inflow,
                cost: 0.02,
                seed,
            },
            random: RunOutcome {
                summary: random,
                snapshots: Vec::new(),
            },
            informed: RunOutcome {
                summary: informed,
                snapshots: Vec::new(),
            },
        }
    }

    fn constant_shift_results() -> Vec<JobResult> {
        (0..6)
            .map(|seed| {
                let base = 10.0 + seed as f64;
                job_result(
                    seed as usize,
                    0.1,
                    seed,
                    summary(Mode::Random, seed, 20 + seed, 1, base),
                    summary(Mode::Informed, seed, 50, 0, base + 2.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_group_key_format() {
        assert_eq!(group_key(0.0, 0.1, 0.02), "0.000000|0.100000|0.020000");
    }

    #[test]
    fn test_grouping_preserves_first_seen_order() {
        let mut results = constant_shift_results();
        results.insert(
            1,
            job_result(99, 0.3, 0, summary(Mode::Random, 0, 5, 1, 1.0), summary(Mode::Informed, 0, 5, 1, 1.0)),
        );
        let groups = group_results(&results);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].inflow, 0.1);
        assert_eq!(groups[0].pairs.len(), 6);
        assert_eq!(groups[1].pairs.len(), 1);
    }

    #[test]
    fn test_constant_difference_collapses_interval() {
        let results = constant_shift_results();
        let stats = StatsConfig {
            resamples: 300,
            ..Default::default()
        };
        let groups = group_results(&results);
        let aggregates = aggregate_groups(&groups, &stats, 50.0).unwrap();
        let agg = &aggregates[0];

        let sigma = agg.metric("sigmaProxyCumEnd").unwrap();
        assert!((sigma.mean_diff - 2.0).abs() < 1e-12);
        assert!((sigma.ci.lo - 2.0).abs() < 1e-9);
        assert!((sigma.ci.hi - 2.0).abs() < 1e-9);
        assert!(sigma.sd_diff < 1e-12);
        assert!((sigma.mean_random - 12.5).abs() < 1e-12);

        assert!(agg.metric("sigmaProxyMeasureMean").is_none());
        assert!(agg.metric("sigmaProxyTailMean").is_some());

        assert_eq!(agg.events_random, 6);
        assert_eq!(agg.events_informed, 0);
        assert!((agg.rmst_informed - 50.0).abs() < 1e-12);
        assert!(agg.d_rmst > 0.0);
        assert!(agg.log_rank.z < 0.0);
        assert!(agg.hedges_g.unwrap() > 0.0);
    }

    #[test]
    fn test_aggregation_is_reproducible() {
        let results = constant_shift_results();
        let config = Config::default();
        let a = aggregate_results(&results, &config).unwrap();
        let b = aggregate_results(&results, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_arm_is_fatal() {
        let results = vec![job_result(
            0,
            0.1,
            0,
            summary(Mode::Random, 0, 5, 1, 1.0),
            summary(Mode::Off, 0, 5, 1, 1.0),
        )];

        match aggregate_results(&results, &Config::default()) {
            Err(SimError::EmptyGroup { arm, .. }) => assert_eq!(arm, "informed"),
            other => panic!("expected EmptyGroup, got {:?}", other.map(|a| a.len())),
        }
    }

    #[test]
    fn test_fnv_is_stable() {
        assert_eq!(fnv1a(""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(fnv1a("a"), fnv1a("b"));
    }
}
