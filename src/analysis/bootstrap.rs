//! Descriptive statistics and percentile bootstrap intervals.

use crate::rng::SimRng;
use serde::{Deserialize, Serialize};

/// Two-sided percentile interval
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lo: f64,
    pub hi: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1); zero below two values
pub fn sd(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Linear-interpolated quantile of an ascending slice
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Percentile interval of bootstrap replicates
pub fn percentile_interval(mut replicates: Vec<f64>, alpha: f64) -> ConfidenceInterval {
    replicates.sort_by(|a, b| a.total_cmp(b));
    ConfidenceInterval {
        lo: quantile_sorted(&replicates, alpha / 2.0),
        hi: quantile_sorted(&replicates, 1.0 - alpha / 2.0),
    }
}

/// Resample indices with replacement `resamples` times and collect the
/// statistic of each draw
pub fn bootstrap_replicates<F>(n: usize, resamples: usize, rng: &mut SimRng, mut statistic: F) -> Vec<f64>
where
    F: FnMut(&[usize]) -> f64,
{
    let mut indices = vec![0usize; n];
    (0..resamples)
        .map(|_| {
            for slot in indices.iter_mut() {
                *slot = rng.index(n);
            }
            statistic(&indices)
        })
        .collect()
}

/// Percentile bootstrap interval for the mean. `None` for an empty slice.
pub fn bootstrap_ci(values: &[f64], resamples: usize, alpha: f64, rng: &mut SimRng) -> Option<ConfidenceInterval> {
    if values.is_empty() {
        return None;
    }
    let replicates = bootstrap_replicates(values.len(), resamples, rng, |idx| {
        idx.iter().map(|&i| values[i]).sum::<f64>() / idx.len() as f64
    });
    Some(percentile_interval(replicates, alpha))
}

/// Bias-corrected standardized mean difference `(mean(b) - mean(a)) / s_pooled`.
/// `None` when either group has fewer than two values or the pooled SD is zero.
pub fn hedges_g(a: &[f64], b: &[f64]) -> Option<f64> {
    let (na, nb) = (a.len(), b.len());
    if na < 2 || nb < 2 {
        return None;
    }

    let pooled_var = ((na - 1) as f64 * sd(a).powi(2) + (nb - 1) as f64 * sd(b).powi(2))
        / (na + nb - 2) as f64;
    let pooled = pooled_var.sqrt();
    if pooled <= 0.0 || !pooled.is_finite() {
        return None;
    }

    let d = (mean(b) - mean(a)) / pooled;
    let correction = 1.0 - 3.0 / (4.0 * (na + nb) as f64 - 9.0);
    Some(d * correction)
}
