//! Model preprocessing: median imputation and standardization.
//!
//! Both are fit on the training split only and serialized inside the model
//! artifact, so the statistics are versioned with the model they feed.

use serde::{Deserialize, Serialize};

/// Fills missing feature values with the per-column training median.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedianImputer {
    pub medians: Vec<f64>,
}

impl MedianImputer {
    /// Fit per-column medians; a column with no observed values gets 0.
    pub fn fit(rows: &[Vec<Option<f64>>], n_features: usize) -> Self {
        let mut medians = vec![0.0; n_features];
        for (col, median_slot) in medians.iter_mut().enumerate() {
            let mut values: Vec<f64> = rows
                .iter()
                .filter_map(|row| row.get(col).copied().flatten())
                .collect();
            if values.is_empty() {
                continue;
            }
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = values.len() / 2;
            *median_slot = if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            };
        }
        Self { medians }
    }

    pub fn transform_row(&self, row: &[Option<f64>]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(col, v)| v.unwrap_or_else(|| self.medians.get(col).copied().unwrap_or(0.0)))
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<Option<f64>>]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }
}

/// Zero-mean, unit-variance scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>], n_features: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; n_features];
        for row in rows {
            for (col, v) in row.iter().enumerate() {
                means[col] += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut stds = vec![0.0; n_features];
        for row in rows {
            for (col, v) in row.iter().enumerate() {
                let d = v - means[col];
                stds[col] += d * d;
            }
        }
        for s in &mut stds {
            *s = (*s / n).sqrt();
            // Constant columns pass through unscaled.
            if *s < 1e-12 {
                *s = 1.0;
            }
        }

        Self { means, stds }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(col, v)| (v - self.means[col]) / self.stds[col])
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imputer_uses_column_median() {
        let rows = vec![
            vec![Some(1.0), None],
            vec![Some(3.0), Some(10.0)],
            vec![None, Some(20.0)],
            vec![Some(5.0), Some(30.0)],
        ];
        let imputer = MedianImputer::fit(&rows, 2);
        assert_eq!(imputer.medians, vec![3.0, 20.0]);

        let filled = imputer.transform_row(&[None, None]);
        assert_eq!(filled, vec![3.0, 20.0]);
    }

    #[test]
    fn test_scaler_standardizes_and_handles_constants() {
        let rows = vec![vec![1.0, 7.0], vec![3.0, 7.0], vec![5.0, 7.0]];
        let scaler = StandardScaler::fit(&rows, 2);
        assert_eq!(scaler.means[0], 3.0);

        let scaled = scaler.transform(&rows);
        let mean: f64 = scaled.iter().map(|r| r[0]).sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-12);
        // Constant column is passed through centered, not exploded.
        assert!(scaled.iter().all(|r| r[1] == 0.0));
    }
}
