//! Statistics engine trait and its percentile-bootstrap implementation.

use super::bootstrap::{self, ConfidenceInterval};
use super::survival::{self, KmCurve, LogRankResult, SurvivalRecord};
use crate::config::StatsConfig;
use crate::rng::SimRng;

/// Statistics used by the aggregation layer. Random sources are passed in
/// explicitly so callers control reproducibility.
pub trait StatsEngine {
    fn mean(&self, values: &[f64]) -> f64;
    fn sd(&self, values: &[f64]) -> f64;
    fn bootstrap_ci(&self, values: &[f64], rng: &mut SimRng) -> Option<ConfidenceInterval>;
    /// Log-rank test with `b` as the reference group
    fn log_rank_test(&self, a: &[SurvivalRecord], b: &[SurvivalRecord]) -> LogRankResult;
    fn km_curve(&self, records: &[SurvivalRecord]) -> KmCurve;
    fn rmst_km(&self, records: &[SurvivalRecord], tau: f64) -> f64;
    /// Interval for `rmst(informed) - rmst(random)`, resampling pairs.
    /// `random[i]` and `informed[i]` must come from the same seed.
    fn bootstrap_rmst_diff_ci(
        &self,
        random: &[SurvivalRecord],
        informed: &[SurvivalRecord],
        tau: f64,
        rng: &mut SimRng,
    ) -> Option<ConfidenceInterval>;
    fn hedges_g(&self, a: &[f64], b: &[f64]) -> Option<f64>;
}

/// Percentile bootstrap with `resamples` draws at level `alpha`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BootstrapStats {
    pub resamples: usize,
    pub alpha: f64,
}

impl BootstrapStats {
    pub fn new(resamples: usize, alpha: f64) -> Self {
        Self { resamples, alpha }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        Self::new(config.resamples, config.alpha)
    }
}

impl Default for BootstrapStats {
    fn default() -> Self {
        Self::from_config(&StatsConfig::default())
    }
}

fn split(records: &[SurvivalRecord]) -> (Vec<f64>, Vec<bool>) {
    records.iter().map(|r| (r.time as f64, r.is_event())).unzip()
}

impl StatsEngine for BootstrapStats {
    fn mean(&self, values: &[f64]) -> f64 {
        bootstrap::mean(values)
    }

    fn sd(&self, values: &[f64]) -> f64 {
        bootstrap::sd(values)
    }

    fn bootstrap_ci(&self, values: &[f64], rng: &mut SimRng) -> Option<ConfidenceInterval> {
        bootstrap::bootstrap_ci(values, self.resamples, self.alpha, rng)
    }

    fn log_rank_test(&self, a: &[SurvivalRecord], b: &[SurvivalRecord]) -> LogRankResult {
        let (times_a, events_a) = split(a);
        let (times_b, events_b) = split(b);
        survival::log_rank_test(&times_a, &events_a, &times_b, &events_b)
    }

    fn km_curve(&self, records: &[SurvivalRecord]) -> KmCurve {
        let (times, events) = split(records);
        survival::km_curve(&times, &events)
    }

    fn rmst_km(&self, records: &[SurvivalRecord], tau: f64) -> f64 {
        let (times, events) = split(records);
        survival::rmst_km(&times, &events, tau)
    }

    fn bootstrap_rmst_diff_ci(
        &self,
        random: &[SurvivalRecord],
        informed: &[SurvivalRecord],
        tau: f64,
        rng: &mut SimRng,
    ) -> Option<ConfidenceInterval> {
        if random.is_empty() || random.len() != informed.len() {
            return None;
        }

        let (times_r, events_r) = split(random);
        let (times_i, events_i) = split(informed);
        let n = random.len();
        let mut buf_r = (Vec::with_capacity(n), Vec::with_capacity(n));
        let mut buf_i = (Vec::with_capacity(n), Vec::with_capacity(n));

        let replicates = bootstrap::bootstrap_replicates(n, self.resamples, rng, |idx| {
            buf_r.0.clear();
            buf_r.1.clear();
            buf_i.0.clear();
            buf_i.1.clear();
            for &i in idx {
                buf_r.0.push(times_r[i]);
                buf_r.1.push(events_r[i]);
                buf_i.0.push(times_i[i]);
                buf_i.1.push(events_i[i]);
            }
            survival::rmst_km(&buf_i.0, &buf_i.1, tau) - survival::rmst_km(&buf_r.0, &buf_r.1, tau)
        });

        Some(bootstrap::percentile_interval(replicates, self.alpha))
    }

    fn hedges_g(&self, a: &[f64], b: &[f64]) -> Option<f64> {
        bootstrap::hedges_g(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: u64, event: u8, group: u8, seed: u64) -> SurvivalRecord {
        SurvivalRecord {
            time,
            event,
            group,
            noise: 0.0,
            inflow: 0.1,
            cost: 0.01,
            seed,
        }
    }

    #[test]
    fn test_identical_arms_give_zero_rmst_diff() {
        let engine = BootstrapStats::new(400, 0.05);
        let random: Vec<_> = (0..8).map(|s| record(10 + s * 3, 1, 0, s)).collect();
        let informed: Vec<_> = random.iter().map(|r| SurvivalRecord { group: 1, ..*r }).collect();

        let ci = engine
            .bootstrap_rmst_diff_ci(&random, &informed, 50.0, &mut SimRng::new(3))
            .unwrap();
        assert_eq!(ci.lo, 0.0);
        assert_eq!(ci.hi, 0.0);
        assert!(engine.log_rank_test(&random, &informed).z.abs() < 1e-12);
    }

    #[test]
    fn test_rmst_diff_ci_sign() {
        let engine = BootstrapStats::new(500, 0.05);
        let random: Vec<_> = (0..10).map(|s| record(5 + s, 1, 0, s)).collect();
        let informed: Vec<_> = (0..10).map(|s| record(40, 0, 1, s)).collect();

        let ci = engine
            .bootstrap_rmst_diff_ci(&random, &informed, 40.0, &mut SimRng::new(11))
            .unwrap();
        assert!(ci.lo > 0.0);
        assert!(ci.hi <= 40.0);
    }

    #[test]
    fn test_unpaired_arms_rejected() {
        let engine = BootstrapStats::default();
        let random = vec![record(3, 1, 0, 0)];
        assert!(engine
            .bootstrap_rmst_diff_ci(&random, &[], 10.0, &mut SimRng::new(1))
            .is_none());
    }

    #[test]
    fn test_engine_curve_and_rmst_agree() {
        let engine = BootstrapStats::default();
        let records = vec![record(1, 1, 0, 0), record(2, 1, 0, 1), record(3, 1, 0, 2)];

        let curve = engine.km_curve(&records);
        assert_eq!(curve.points.len(), 4);
        assert!((engine.rmst_km(&records, 3.0) - 2.0).abs() < 1e-12);
    }
}
