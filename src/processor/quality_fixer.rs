use anyhow::Result;
use polars::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::columns::{CATEGORY_COLUMN, DATE_CANDIDATES, TIME_COLUMN, is_business_numeric};
use super::datetime::{format_timestamp, parse_timestamp};
use super::{FrameExt, stats};
use crate::config::TransformConfig;

pub const MISSING_TEXT: &str = "unknown";

/// Used when a numeric column has no values at all to take a median from.
pub const EMPTY_MEDIAN_FALLBACK: f64 = 0.0;

/// Pre-join cleaning: missing values, date/time representation and
/// category exclusion.
pub struct QualityFixer {
    excluded: HashSet<String>,
}

impl QualityFixer {
    pub fn new(config: &TransformConfig) -> Self {
        QualityFixer {
            excluded: config
                .excluded_categories
                .iter()
                .map(|c| c.trim().to_lowercase())
                .collect(),
        }
    }

    /// Numeric columns get their median, everything else the `unknown`
    /// marker. Returns the names of the columns that were touched.
    pub fn fill_missing(&self, df: &mut DataFrame) -> Result<Vec<String>> {
        let mut filled = Vec::new();

        for name in df.column_names_owned() {
            let column = df.column(&name)?;
            let null_count = column.null_count();
            let coerce_text = is_business_numeric(&name) && column.dtype() == &DataType::String;

            if df.is_numeric_column(&name) || coerce_text {
                let values = df.f64_values(&name)?;
                let missing = values.iter().filter(|v| v.is_none()).count();
                if missing == 0 && !coerce_text {
                    continue;
                }

                let median = stats::median(&values).unwrap_or_else(|| {
                    warn!(
                        "Column '{}' has no numeric values, filling with {}",
                        name, EMPTY_MEDIAN_FALLBACK
                    );
                    EMPTY_MEDIAN_FALLBACK
                });

                let repaired: Vec<f64> = values.into_iter().map(|v| v.unwrap_or(median)).collect();
                df.put_column(Series::new(name.as_str().into(), repaired))?;
                debug!("Filled {} missing values in '{}' with median {}", missing, name, median);
                filled.push(name);
            } else if null_count > 0 {
                let repaired: Vec<String> = df
                    .text_values(&name)?
                    .into_iter()
                    .map(|v| v.unwrap_or_else(|| MISSING_TEXT.to_string()))
                    .collect();
                df.put_column(Series::new(name.as_str().into(), repaired))?;
                debug!("Filled {} missing values in '{}' with '{}'", null_count, name, MISSING_TEXT);
                filled.push(name);
            }
        }

        info!("Filled missing values in {} columns", filled.len());
        Ok(filled)
    }

    /// Parse the transaction date (unparseable -> missing) and render the
    /// time-of-day column as text.
    pub fn standardize_datetime(&self, df: &mut DataFrame) -> Result<()> {
        if let Some(date_col) = df.first_present(DATE_CANDIDATES) {
            let parsed: Vec<Option<String>> = df
                .text_values(date_col)?
                .iter()
                .map(|v| {
                    v.as_deref()
                        .and_then(parse_timestamp)
                        .map(|dt| format_timestamp(&dt))
                })
                .collect();

            let unparsed = parsed.iter().filter(|v| v.is_none()).count();
            if unparsed > 0 {
                warn!("{} values in '{}' could not be parsed as dates", unparsed, date_col);
            }

            df.put_column(Series::new(date_col.into(), parsed))?;
        }

        if df.has_column(TIME_COLUMN) {
            let as_text = df.text_values(TIME_COLUMN)?;
            df.put_column(Series::new(TIME_COLUMN.into(), as_text))?;
        }

        Ok(())
    }

    /// Remove rows of excluded categories. Also honours one-hot indicator
    /// columns (`product_category_<value>`), so applying it after encoding
    /// is still meaningful. Idempotent.
    pub fn exclude_categories(&self, df: &DataFrame) -> Result<(DataFrame, usize)> {
        let mut drop = vec![false; df.height()];

        if df.has_column(CATEGORY_COLUMN) {
            for (row, value) in df.text_values(CATEGORY_COLUMN)?.iter().enumerate() {
                if let Some(value) = value {
                    if self.excluded.contains(&value.trim().to_lowercase()) {
                        drop[row] = true;
                    }
                }
            }
        }

        let prefix = format!("{}_", CATEGORY_COLUMN);
        for name in df.column_names_owned() {
            let lowered = name.to_lowercase();
            let Some(value) = lowered.strip_prefix(&prefix) else {
                continue;
            };
            if !self.excluded.contains(value) {
                continue;
            }

            for (row, flag) in df.text_values(&name)?.iter().enumerate() {
                if matches!(flag.as_deref(), Some("true") | Some("1")) {
                    drop[row] = true;
                }
            }
        }

        let removed = drop.iter().filter(|d| **d).count();
        if removed == 0 {
            return Ok((df.clone(), 0));
        }

        let keep: Vec<bool> = drop.iter().map(|d| !d).collect();
        info!("Removed {} rows belonging to excluded categories", removed);
        Ok((df.retain_rows(&keep)?, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixer() -> QualityFixer {
        QualityFixer::new(&TransformConfig::default())
    }

    #[test]
    fn test_fill_missing_median_and_marker() {
        let mut df = df!(
            "unit_price" => [Some(1.0), None, Some(3.0), Some(10.0)],
            "store_location" => [Some("Astoria"), None, Some("Astoria"), None],
        )
        .unwrap();

        let filled = fixer().fill_missing(&mut df).unwrap();

        assert_eq!(filled.len(), 2);
        assert_eq!(
            df.f64_values("unit_price").unwrap(),
            vec![Some(1.0), Some(3.0), Some(3.0), Some(10.0)]
        );
        assert_eq!(
            df.text_values("store_location").unwrap()[1].as_deref(),
            Some("unknown")
        );
    }

    #[test]
    fn test_all_missing_numeric_column_falls_back_to_zero() {
        let mut df = df!(
            "unit_price" => [None::<&str>, None, None],
            "product_id" => [1i64, 2, 3],
        )
        .unwrap();

        fixer().fill_missing(&mut df).unwrap();

        assert_eq!(
            df.f64_values("unit_price").unwrap(),
            vec![Some(0.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(df.column("product_id").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_standardize_datetime() {
        let mut df = df!(
            "transaction_date" => ["1/15/2024", "unknown", "2024-01-16"],
            "transaction_time" => ["07:06:11", "08:00:00", "09:30:00"],
        )
        .unwrap();

        fixer().standardize_datetime(&mut df).unwrap();

        assert_eq!(
            df.text_values("transaction_date").unwrap(),
            vec![Some("2024-01-15".to_string()), None, Some("2024-01-16".to_string())]
        );
        assert_eq!(df.column("transaction_time").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_exclusion_matches_spelling_variants_and_is_idempotent() {
        let df = df!(
            "product_category" => ["Coffee", "Flavours", "BRANDED", "Flavors", "Tea"],
        )
        .unwrap();

        let (once, removed) = fixer().exclude_categories(&df).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(
            once.text_values("product_category").unwrap(),
            vec![Some("Coffee".to_string()), Some("Tea".to_string())]
        );

        let (twice, removed_again) = fixer().exclude_categories(&once).unwrap();
        assert_eq!(removed_again, 0);
        assert_eq!(twice.height(), once.height());
    }

    #[test]
    fn test_exclusion_honours_indicator_columns() {
        let df = df!(
            "product_category_Coffee" => [true, false],
            "product_category_Branded" => [false, true],
        )
        .unwrap();

        let (kept, removed) = fixer().exclude_categories(&df).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(kept.height(), 1);
    }
}
