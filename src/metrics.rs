//! Point-forecast error metrics.
//!
//! The percentage metrics skip indices their denominator cannot
//! handle (zero actuals for MAPE, zero magnitude sums for sMAPE) and
//! report 0 when nothing remains.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub smape: f64,
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean_sq = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64;
    mean_sq.sqrt()
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / y_true.len() as f64
}

/// Mean absolute percentage error over indices where the actual is
/// non-zero.
pub fn mape(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let terms: Vec<f64> = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, _)| **t != 0.0)
        .map(|(t, p)| ((t - p) / t).abs())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    100.0 * terms.iter().sum::<f64>() / terms.len() as f64
}

/// Symmetric MAPE over indices where (|y| + |y_hat|) / 2 is non-zero.
pub fn smape(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let terms: Vec<f64> = y_true
        .iter()
        .zip(y_pred)
        .filter_map(|(t, p)| {
            let denominator = (t.abs() + p.abs()) / 2.0;
            (denominator != 0.0).then(|| (t - p).abs() / denominator)
        })
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    100.0 * terms.iter().sum::<f64>() / terms.len() as f64
}

pub fn compute_all(y_true: &[f64], y_pred: &[f64]) -> MetricReport {
    debug_assert_eq!(y_true.len(), y_pred.len());
    MetricReport {
        rmse: rmse(y_true, y_pred),
        mae: mae(y_true, y_pred),
        mape: mape(y_true, y_pred),
        smape: smape(y_true, y_pred),
    }
}
