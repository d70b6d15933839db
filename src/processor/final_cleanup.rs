use anyhow::Result;
use polars::prelude::*;
use tracing::{info, warn};

use super::columns::{CATEGORY_MAPPED, DATE_KEY, GROSS_REVENUE, REV_PER_UNIT, TREND_FOR_PRODUCT};
use super::frame_ext::ColumnContract;

pub const CONTRACT: ColumnContract = ColumnContract {
    stage: "final cleanup",
    required: &[CATEGORY_MAPPED, DATE_KEY],
    optional: &[GROSS_REVENUE, REV_PER_UNIT, TREND_FOR_PRODUCT],
};

/// Last pass before publishing: every surviving row has a category, a
/// date_key and no missing money/trend values.
pub struct FinalCleanup;

impl FinalCleanup {
    /// Returns the cleaned table and the number of rows dropped.
    pub fn apply(&self, df: &DataFrame) -> Result<(DataFrame, usize)> {
        let fillable = CONTRACT.check(df)?;

        let fills: Vec<Expr> = fillable
            .iter()
            .map(|name| col(*name).cast(DataType::Float64).fill_null(lit(0.0)))
            .collect();

        let cleaned = df
            .clone()
            .lazy()
            .filter(
                col(CATEGORY_MAPPED)
                    .is_not_null()
                    .and(col(DATE_KEY).cast(DataType::Int64).fill_null(lit(0)).neq(lit(0))),
            )
            .with_columns(fills)
            .collect()?;
        let dropped = df.height() - cleaned.height();

        if dropped > 0 {
            warn!("Final cleanup dropped {} rows without category or date_key", dropped);
        } else {
            info!("Final cleanup kept all {} rows", cleaned.height());
        }

        Ok((cleaned, dropped))
    }
}
