use anyhow::Result;
use polars::prelude::*;
use tracing::info;

use super::columns::{OUTLIER_PREFERENCE, SYNTHETIC_KEY, TRANSACTION_ID};
use super::{FrameExt, stats};
use crate::models::OutlierBounds;

const MAX_TARGETS: usize = 2;

pub struct OutlierReport {
    pub bounds: Vec<OutlierBounds>,
    pub normalized: Vec<String>,
}

/// IQR clipping plus min-max companions on up to two numeric columns.
pub struct OutlierNormalizer {
    iqr_multiplier: f64,
}

impl OutlierNormalizer {
    pub fn new(iqr_multiplier: f64) -> Self {
        OutlierNormalizer { iqr_multiplier }
    }

    /// Preferred business columns first, padded with any other numeric
    /// column. Key columns are never clipped.
    pub fn select_targets(&self, df: &DataFrame) -> Vec<String> {
        let numeric: Vec<String> = df
            .column_names_owned()
            .into_iter()
            .filter(|c| df.is_numeric_column(c) && c != TRANSACTION_ID && c != SYNTHETIC_KEY)
            .collect();

        let mut targets: Vec<String> = OUTLIER_PREFERENCE
            .iter()
            .filter(|c| numeric.iter().any(|n| n == *c))
            .map(|c| c.to_string())
            .collect();

        for name in numeric {
            if !targets.contains(&name) {
                targets.push(name);
            }
        }

        targets.truncate(MAX_TARGETS);
        targets
    }

    /// Bounds computed once over the column as it stands.
    pub fn iqr_bounds(&self, column: &str, values: &[Option<f64>]) -> Option<OutlierBounds> {
        let q1 = stats::quantile(values, 0.25)?;
        let q3 = stats::quantile(values, 0.75)?;
        let iqr = q3 - q1;

        Some(OutlierBounds {
            column: column.to_string(),
            q1,
            q3,
            lower: q1 - self.iqr_multiplier * iqr,
            upper: q3 + self.iqr_multiplier * iqr,
        })
    }

    pub fn clip(values: &[Option<f64>], lower: f64, upper: f64) -> Vec<Option<f64>> {
        values
            .iter()
            .map(|v| v.map(|x| x.clamp(lower, upper)))
            .collect()
    }

    /// Scale to [0, 1]; a constant column maps to 0.
    pub fn min_max(values: &[Option<f64>]) -> Vec<Option<f64>> {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let min = present.iter().copied().fold(f64::INFINITY, f64::min);
        let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;

        values
            .iter()
            .map(|v| {
                v.map(|x| {
                    if range > 0.0 && range.is_finite() {
                        (x - min) / range
                    } else {
                        0.0
                    }
                })
            })
            .collect()
    }

    pub fn apply(&self, df: &mut DataFrame) -> Result<OutlierReport> {
        let targets = self.select_targets(df);
        let mut bounds = Vec::new();
        let mut normalized = Vec::new();

        for column in targets {
            let values = df.f64_values(&column)?;
            let Some(column_bounds) = self.iqr_bounds(&column, &values) else {
                continue;
            };

            let clipped = Self::clip(&values, column_bounds.lower, column_bounds.upper);
            let changed = clipped.iter().zip(values.iter()).filter(|(a, b)| a != b).count();
            info!(
                "Clipped {} values of '{}' to [{:.4}, {:.4}]",
                changed, column, column_bounds.lower, column_bounds.upper
            );

            let scaled = Self::min_max(&clipped);
            df.put_column(Series::new(column.as_str().into(), clipped))?;
            df.put_column(Series::new(format!("{}_minmax", column).into(), scaled))?;

            normalized.push(column);
            bounds.push(column_bounds);
        }

        Ok(OutlierReport { bounds, normalized })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_business_columns() {
        let df = df!(
            "store_id" => [1i64, 2],
            "transaction_qty" => [1i64, 2],
            "unit_price" => [3.0, 4.0],
            "product_id" => [7i64, 8],
        )
        .unwrap();

        let targets = OutlierNormalizer::new(1.5).select_targets(&df);
        assert_eq!(targets, vec!["unit_price", "transaction_qty"]);
    }

    #[test]
    fn test_pads_with_other_numeric_columns() {
        let df = df!(
            "store_id" => [1i64, 2],
            "unit_price" => [3.0, 4.0],
            "label" => ["a", "b"],
        )
        .unwrap();

        let targets = OutlierNormalizer::new(1.5).select_targets(&df);
        assert_eq!(targets, vec!["unit_price", "store_id"]);
    }

    #[test]
    fn test_clip_and_minmax() {
        let mut df = df!(
            "unit_price" => [1.0, 2.0, 3.0, 4.0, 100.0],
        )
        .unwrap();

        let report = OutlierNormalizer::new(1.5).apply(&mut df).unwrap();

        // q1 = 2, q3 = 4, iqr = 2 -> upper = 7
        assert_eq!(report.bounds[0].upper, 7.0);
        assert_eq!(
            df.f64_values("unit_price").unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(7.0)]
        );
        assert_eq!(
            df.f64_values("unit_price_minmax").unwrap(),
            vec![Some(0.0), Some(1.0 / 6.0), Some(2.0 / 6.0), Some(0.5), Some(1.0)]
        );
        assert_eq!(report.normalized, vec!["unit_price"]);
    }

    #[test]
    fn test_iqr_clipping_is_idempotent() {
        let normalizer = OutlierNormalizer::new(1.5);
        let values = vec![Some(-50.0), Some(2.0), Some(3.0), Some(3.5), Some(4.0), Some(90.0)];

        let first_bounds = normalizer.iqr_bounds("x", &values).unwrap();
        let once = OutlierNormalizer::clip(&values, first_bounds.lower, first_bounds.upper);

        let second_bounds = normalizer.iqr_bounds("x", &once).unwrap();
        let twice = OutlierNormalizer::clip(&once, second_bounds.lower, second_bounds.upper);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_constant_column_normalizes_to_zero() {
        let scaled = OutlierNormalizer::min_max(&[Some(5.0), Some(5.0)]);
        assert_eq!(scaled, vec![Some(0.0), Some(0.0)]);
    }
}
