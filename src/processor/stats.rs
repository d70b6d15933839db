//! Small numeric helpers shared by the cleaning and validation stages.
//!
//! Quantiles use linear interpolation between closest ranks, matching the
//! usual dataframe defaults.

use polars::prelude::*;

fn chunked(values: &[Option<f64>]) -> Float64Chunked {
    Float64Chunked::from_iter_options(
        "values".into(),
        values.iter().map(|v| v.filter(|x| !x.is_nan())),
    )
}

/// Quantile `q` in `[0, 1]`; `None` when there are no values.
pub fn quantile(values: &[Option<f64>], q: f64) -> Option<f64> {
    chunked(values)
        .quantile(q.clamp(0.0, 1.0), QuantileMethod::Linear)
        .ok()
        .flatten()
}

pub fn median(values: &[Option<f64>]) -> Option<f64> {
    chunked(values).median()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
