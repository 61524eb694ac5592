//! Zero-crossing estimation along the inflow axis of `agg.csv`.

use crate::error::{Result, SimError};
use serde::Serialize;
use std::path::Path;

/// A sign change located by linear interpolation
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Crossing {
    /// Interpolated abscissa
    pub x: f64,
    /// Index of the grid point at or left of the crossing
    pub index: usize,
}

/// Crossings of one (noise, cost) series
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrossingSeries {
    pub noise: f64,
    pub cost: f64,
    pub points: usize,
    pub crossings: Vec<Crossing>,
}

/// Every sign change of `y` over ascending `x`, scanned interval by
/// interval. An exact zero counts once, at the left end of its interval, so a
/// zero at the last point is never reported. Non-finite values break the
/// series.
pub fn zero_crossings(x: &[f64], y: &[f64]) -> Vec<Crossing> {
    let n = x.len().min(y.len());
    let mut crossings = Vec::new();

    for i in 0..n.saturating_sub(1) {
        if y[i] == 0.0 {
            crossings.push(Crossing { x: x[i], index: i });
            continue;
        }
        let (y0, y1) = (y[i], y[i + 1]);
        if !y0.is_finite() || !y1.is_finite() || y1 == 0.0 {
            continue;
        }
        if y0.signum() != y1.signum() {
            let t = y0 / (y0 - y1);
            crossings.push(Crossing {
                x: x[i] + t * (x[i + 1] - x[i]),
                index: i,
            });
        }
    }

    crossings
}

fn column(header: &[&str], name: &str) -> Result<usize> {
    header
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| SimError::Malformed(format!("agg.csv has no column `{}`", name)))
}

/// Read an `agg.csv`, group rows by (noise, cost) in first-seen order, sort
/// each group by inflow and locate the crossings of `target`. Rows with a
/// blank target are skipped.
pub fn crossings_from_agg<P: AsRef<Path>>(path: P, target: &str) -> Result<Vec<CrossingSeries>> {
    let contents = std::fs::read_to_string(path)?;
    let mut lines = contents.lines();
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| SimError::Malformed("agg.csv is empty".to_string()))?
        .split(',')
        .collect();

    let inflow_col = column(&header, "inflowRate")?;
    let noise_col = column(&header, "sensingNoise")?;
    let cost_col = column(&header, "intelligenceCost")?;
    let target_col = column(&header, target)?;

    // (noise, cost) -> [(inflow, value)]
    let mut groups: Vec<((f64, f64), Vec<(f64, f64)>)> = Vec::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let parse = |col: usize| -> Result<Option<f64>> {
            match fields.get(col).map(|f| f.trim()) {
                None | Some("") => Ok(None),
                Some(text) => text.parse::<f64>().map(Some).map_err(|e| {
                    SimError::Malformed(format!("line {}: `{}`: {}", line_no + 2, text, e))
                }),
            }
        };

        let (Some(inflow), Some(noise), Some(cost)) = (parse(inflow_col)?, parse(noise_col)?, parse(cost_col)?) else {
            return Err(SimError::Malformed(format!("line {}: missing parameter values", line_no + 2)));
        };
        let value = parse(target_col)?;

        let index = match groups.iter().position(|(key, _)| *key == (noise, cost)) {
            Some(index) => index,
            None => {
                groups.push(((noise, cost), Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(value) = value {
            groups[index].1.push((inflow, value));
        }
    }

    Ok(groups
        .into_iter()
        .map(|((noise, cost), mut series)| {
            series.sort_by(|a, b| a.0.total_cmp(&b.0));
            let (x, y): (Vec<f64>, Vec<f64>) = series.into_iter().unzip();
            CrossingSeries {
                noise,
                cost,
                points: x.len(),
                crossings: zero_crossings(&x, &y),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_interpolated_crossing() {
        let crossings = zero_crossings(&[0.0, 1.0, 2.0], &[-1.0, 1.0, 3.0]);
        assert_eq!(crossings, vec![Crossing { x: 0.5, index: 0 }]);
    }

    #[test]
    fn test_exact_zero_counts_once() {
        let crossings = zero_crossings(&[0.0, 1.0, 2.0], &[-1.0, 0.0, 1.0]);
        assert_eq!(crossings, vec![Crossing { x: 1.0, index: 1 }]);
    }

    #[test]
    fn test_zero_at_last_point_not_reported() {
        assert!(zero_crossings(&[0.0, 1.0, 2.0], &[-1.0, -0.5, 0.0]).is_empty());
        assert!(zero_crossings(&[0.3], &[0.0]).is_empty());

        let crossings = zero_crossings(&[0.0, 1.0, 2.0], &[0.0, 1.0, 0.0]);
        assert_eq!(crossings, vec![Crossing { x: 0.0, index: 0 }]);
    }

    #[test]
    fn test_multiple_crossings() {
        let x = [0.1, 0.2, 0.3, 0.4];
        let y = [2.0, -2.0, -1.0, 3.0];
        let crossings = zero_crossings(&x, &y);

        assert_eq!(crossings.len(), 2);
        assert!((crossings[0].x - 0.15).abs() < 1e-12);
        assert!((crossings[1].x - 0.325).abs() < 1e-12);
    }

    #[test]
    fn test_no_sign_change() {
        assert!(zero_crossings(&[0.0, 1.0], &[1.0, 2.0]).is_empty());
        assert!(zero_crossings(&[], &[]).is_empty());
    }

    #[test]
    fn test_reads_agg_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agg.csv");
        std::fs::write(
            &path,
            "inflowRate,sensingNoise,intelligenceCost,dRmst\n\
             0.2,0,0.01,3\n\
             0.1,0,0.01,-1\n\
             0.1,0.5,0.01,\n\
             0.3,0,0.01,5\n",
        )
        .unwrap();

        let series = crossings_from_agg(&path, "dRmst").unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].points, 3);
        assert_eq!(series[0].crossings.len(), 1);
        assert!((series[0].crossings[0].x - 0.125).abs() < 1e-12);
        assert_eq!(series[1].points, 0);

        assert!(matches!(crossings_from_agg(&path, "nope"), Err(SimError::Malformed(_))));
    }
}
