//! Survival analysis: Kaplan–Meier curves, RMST and the log-rank test.

use serde::{Deserialize, Serialize};

/// One run's survival outcome
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurvivalRecord {
    /// Terminal tick
    pub time: u64,
    /// 1 = extinction observed, 0 = censored
    pub event: u8,
    /// 0 = random, 1 = informed
    pub group: u8,
    pub noise: f64,
    pub inflow: f64,
    pub cost: f64,
    pub seed: u64,
}

impl SurvivalRecord {
    #[inline]
    pub fn is_event(&self) -> bool {
        self.event == 1
    }
}

/// One step of a Kaplan–Meier curve
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KmPoint {
    pub time: f64,
    pub survival: f64,
    pub at_risk: usize,
    pub events: usize,
}

/// Right-continuous step function starting at (0, 1)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KmCurve {
    pub points: Vec<KmPoint>,
}

impl KmCurve {
    /// Survival probability at `t`
    pub fn survival_at(&self, t: f64) -> f64 {
        self.points
            .iter()
            .take_while(|p| p.time <= t)
            .last()
            .map(|p| p.survival)
            .unwrap_or(1.0)
    }
}

/// Distinct times with (events, censored) counts, ascending
fn tally_times(times: &[f64], events: &[bool]) -> Vec<(f64, usize, usize)> {
    let mut pairs: Vec<(f64, bool)> = times.iter().copied().zip(events.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut tallies: Vec<(f64, usize, usize)> = Vec::new();
    for (time, event) in pairs {
        match tallies.last_mut() {
            Some(last) if last.0 == time => {
                if event {
                    last.1 += 1;
                } else {
                    last.2 += 1;
                }
            }
            _ => tallies.push((time, usize::from(event), usize::from(!event))),
        }
    }
    tallies
}

/// Product-limit estimator. Records censored at `t` are still at risk at `t`.
pub fn km_curve(times: &[f64], events: &[bool]) -> KmCurve {
    let mut points = vec![KmPoint {
        time: 0.0,
        survival: 1.0,
        at_risk: times.len(),
        events: 0,
    }];

    let mut at_risk = times.len();
    let mut survival = 1.0;
    for (time, deaths, censored) in tally_times(times, events) {
        if deaths > 0 {
            survival *= 1.0 - deaths as f64 / at_risk as f64;
            points.push(KmPoint {
                time,
                survival,
                at_risk,
                events: deaths,
            });
        }
        at_risk -= deaths + censored;
    }

    KmCurve { points }
}

/// Restricted mean survival time: area under the curve on `[0, tau]`
pub fn rmst_from_curve(curve: &KmCurve, tau: f64) -> f64 {
    let mut area = 0.0;
    for (i, point) in curve.points.iter().enumerate() {
        let start = point.time.max(0.0);
        if start >= tau {
            break;
        }
        let end = curve.points.get(i + 1).map_or(tau, |next| next.time.min(tau));
        area += (end - start) * point.survival;
    }
    area
}

/// Restricted mean survival time straight from times and events
pub fn rmst_km(times: &[f64], events: &[bool], tau: f64) -> f64 {
    rmst_from_curve(&km_curve(times, events), tau)
}

/// Two-group log-rank statistic
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRankResult {
    /// Observed events in the reference group
    pub observed: f64,
    /// Expected events in the reference group
    pub expected: f64,
    /// Hypergeometric variance
    pub variance: f64,
    pub z: f64,
    /// Two-sided p-value from the normal approximation
    pub p_value: f64,
}

/// Log-rank test of group `b` against group `a`. A zero variance gives
/// `z = 0`, `p = 1`.
pub fn log_rank_test(times_a: &[f64], events_a: &[bool], times_b: &[f64], events_b: &[bool]) -> LogRankResult {
    let mut all_times: Vec<f64> = times_a
        .iter()
        .zip(events_a)
        .chain(times_b.iter().zip(events_b))
        .filter(|(_, &e)| e)
        .map(|(&t, _)| t)
        .collect();
    all_times.sort_by(|a, b| a.total_cmp(b));
    all_times.dedup();

    let at_risk = |times: &[f64], t: f64| times.iter().filter(|&&x| x >= t).count() as f64;
    let deaths_at = |times: &[f64], events: &[bool], t: f64| {
        times
            .iter()
            .zip(events)
            .filter(|(&x, &e)| e && x == t)
            .count() as f64
    };

    let mut observed = 0.0;
    let mut expected = 0.0;
    let mut variance = 0.0;
    for t in all_times {
        let n_a = at_risk(times_a, t);
        let n_b = at_risk(times_b, t);
        let n = n_a + n_b;
        let d_b = deaths_at(times_b, events_b, t);
        let d = deaths_at(times_a, events_a, t) + d_b;
        if n <= 0.0 {
            continue;
        }

        observed += d_b;
        expected += d * n_b / n;
        if n > 1.0 {
            variance += d * (n_b / n) * (1.0 - n_b / n) * (n - d) / (n - 1.0);
        }
    }

    let (z, p_value) = if variance > 0.0 {
        let z = (observed - expected) / variance.sqrt();
        (z, 2.0 * (1.0 - normal_cdf(z.abs())))
    } else {
        (0.0, 1.0)
    };

    LogRankResult {
        observed,
        expected,
        variance,
        z,
        p_value: p_value.clamp(0.0, 1.0),
    }
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz–Stegun 7.1.26, absolute error below 1.5e-7
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_km_all_events() {
        let curve = km_curve(&[1.0, 2.0, 3.0], &[true, true, true]);
        let survival: Vec<f64> = curve.points.iter().map(|p| p.survival).collect();

        assert_eq!(curve.points[0].time, 0.0);
        assert!((survival[0] - 1.0).abs() < 1e-12);
        assert!((survival[1] - 2.0 / 3.0).abs() < 1e-12);
        assert!((survival[2] - 1.0 / 3.0).abs() < 1e-12);
        assert!(survival[3].abs() < 1e-12);
    }

    #[test]
    fn test_km_censoring_keeps_at_risk() {
        // Censored at 2 is still at risk at 2
        let curve = km_curve(&[2.0, 2.0, 4.0], &[true, false, true]);

        assert_eq!(curve.points[1].at_risk, 3);
        assert!((curve.points[1].survival - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(curve.points[2].at_risk, 1);
        assert!(curve.points[2].survival.abs() < 1e-12);
    }

    #[test]
    fn test_km_non_increasing() {
        let times = [5.0, 3.0, 9.0, 3.0, 7.0, 12.0, 1.0];
        let events = [true, false, true, true, false, true, true];
        let curve = km_curve(&times, &events);

        for pair in curve.points.windows(2) {
            assert!(pair[1].survival <= pair[0].survival);
        }
        assert_eq!(curve.survival_at(0.5), 1.0);
    }

    #[test]
    fn test_all_censored_curve_is_flat() {
        let curve = km_curve(&[10.0, 10.0], &[false, false]);
        assert_eq!(curve.points.len(), 1);
        assert!((rmst_from_curve(&curve, 10.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_rmst_known_value() {
        let rmst = rmst_km(&[1.0, 2.0, 3.0], &[true, true, true], 3.0);
        assert!((rmst - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rmst_monotone_and_bounded() {
        let times = [4.0, 6.0, 6.0, 11.0, 15.0];
        let events = [true, true, false, true, false];
        let mut previous = 0.0;

        for tau in [0.0, 2.0, 5.0, 6.0, 10.0, 20.0] {
            let rmst = rmst_km(&times, &events, tau);
            assert!(rmst >= previous - 1e-12);
            assert!(rmst <= tau + 1e-12);
            previous = rmst;
        }
    }

    #[test]
    fn test_log_rank_identical_groups() {
        let times = [3.0, 5.0, 5.0, 8.0];
        let events = [true, true, false, true];
        let result = log_rank_test(&times, &events, &times, &events);

        assert!(result.z.abs() < 1e-12);
        assert!((result.p_value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_log_rank_zero_variance() {
        let result = log_rank_test(&[10.0], &[false], &[10.0], &[false]);
        assert_eq!(result.z, 0.0);
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn test_log_rank_detects_shift() {
        let early: Vec<f64> = (1..=10).map(|t| t as f64).collect();
        let late: Vec<f64> = (21..=30).map(|t| t as f64).collect();
        let events = vec![true; 10];
        let result = log_rank_test(&early, &events, &late, &events);

        assert!(result.z < -2.0);
        assert!(result.p_value < 0.05);
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-9);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-4);
    }
}
