use anyhow::Result;
use polars::prelude::*;
use tracing::{info, warn};

use super::columns::{
    CATEGORY_MAPPED, DATE_CANDIDATES, DATE_KEY, DAY_OF_WEEK, GROSS_REVENUE, IS_WEEKEND, MONTH,
    QUANTITY_CANDIDATES, SALE_DATE, TREND_AVG, TREND_FOR_PRODUCT, TREND_MAX, YEAR,
};
use super::datetime::{format_date, parse_date};
use super::frame_ext::ColumnContract;
use super::{FrameExt, stats};

pub const CONTRACT: ColumnContract = ColumnContract {
    stage: "daily category aggregator",
    required: &[CATEGORY_MAPPED, GROSS_REVENUE],
    optional: &[DATE_KEY, TREND_FOR_PRODUCT, TREND_AVG, TREND_MAX],
};

pub const N_TRANSACTIONS: &str = "n_transactions";
pub const TOTAL_QTY: &str = "total_qty";
pub const DAILY_REVENUE: &str = "daily_revenue";
pub const AVG_REVENUE_PER_TX: &str = "avg_revenue_per_tx";
pub const AVG_TREND_FOR_PRODUCT: &str = "avg_trend_for_product";
pub const TREND_AVG_OVERALL: &str = "trend_avg_overall";
pub const TREND_MAX_OVERALL: &str = "trend_max_overall";

/// Rounded to cents for presentation.
const ROUNDED: &[&str] = &[
    DAILY_REVENUE,
    AVG_REVENUE_PER_TX,
    AVG_TREND_FOR_PRODUCT,
    TREND_AVG_OVERALL,
    TREND_MAX_OVERALL,
];

/// Rolls the enriched transactions up to one row per (date, category).
pub struct DailyCategoryAggregator;

impl DailyCategoryAggregator {
    pub fn aggregate(&self, df: &DataFrame) -> Result<DataFrame> {
        CONTRACT.check(df)?;

        let base = self.grouping_frame(df)?;
        let undated = base.column(SALE_DATE)?.null_count();
        if undated > 0 {
            warn!("{} rows have no calendar date and are left out of the aggregate", undated);
        }

        let mut agg = base
            .lazy()
            .filter(col(SALE_DATE).is_not_null())
            .group_by([col(SALE_DATE), col(CATEGORY_MAPPED)])
            .agg([
                col(YEAR).first(),
                col(MONTH).first(),
                col(DAY_OF_WEEK).first(),
                col(IS_WEEKEND).first(),
                col(N_TRANSACTIONS).sum(),
                col(TOTAL_QTY).sum(),
                col(GROSS_REVENUE).sum().alias(DAILY_REVENUE),
                col(GROSS_REVENUE).mean().alias(AVG_REVENUE_PER_TX),
                col(TREND_FOR_PRODUCT).mean().alias(AVG_TREND_FOR_PRODUCT),
                col(TREND_AVG).mean().alias(TREND_AVG_OVERALL),
                col(TREND_MAX).max().alias(TREND_MAX_OVERALL),
            ])
            .sort_by_exprs([col(SALE_DATE), col(CATEGORY_MAPPED)], SortMultipleOptions::default())
            .collect()?;

        for name in ROUNDED {
            let rounded: Vec<Option<f64>> = agg
                .f64_values(name)?
                .into_iter()
                .map(|v| v.map(stats::round2))
                .collect();
            agg.put_column(Series::new((*name).into(), rounded))?;
        }

        info!(
            "Aggregated {} transactions into {} (date, category) rows",
            df.height(),
            agg.height()
        );
        Ok(agg)
    }

    /// Typed copy of just the columns the roll-up reads. Absent optional
    /// columns become zeros (counts, quantities) or nulls (trends).
    fn grouping_frame(&self, df: &DataFrame) -> Result<DataFrame> {
        let height = df.height();

        let sale_dates: Vec<Option<String>> = match df.first_present(DATE_CANDIDATES) {
            Some(date_col) => df
                .text_values(date_col)?
                .iter()
                .map(|v| v.as_deref().and_then(parse_date).map(|d| format_date(&d)))
                .collect(),
            None if df.has_column(DATE_KEY) => df
                .i64_values(DATE_KEY)?
                .iter()
                .map(|k| k.and_then(|k| parse_date(&k.to_string())).map(|d| format_date(&d)))
                .collect(),
            None => vec![None; height],
        };

        let int_or_zero = |name: &str| -> Result<Vec<i64>> {
            if df.has_column(name) {
                Ok(df.i64_values(name)?.into_iter().map(|v| v.unwrap_or(0)).collect())
            } else {
                Ok(vec![0; height])
            }
        };
        let optional_f64 = |name: &str| -> Result<Vec<Option<f64>>> {
            if df.has_column(name) {
                df.f64_values(name)
            } else {
                Ok(vec![None; height])
            }
        };

        let weekend: Vec<bool> = if df.has_column(IS_WEEKEND) {
            df.text_values(IS_WEEKEND)?
                .iter()
                .map(|v| v.as_deref() == Some("true"))
                .collect()
        } else {
            vec![false; height]
        };

        let quantity: Vec<f64> = match df.first_present(QUANTITY_CANDIDATES) {
            Some(name) => df.f64_values(name)?.into_iter().map(|v| v.unwrap_or(0.0)).collect(),
            None => vec![0.0; height],
        };

        let columns: Vec<Column> = vec![
            Series::new(SALE_DATE.into(), sale_dates).into(),
            Series::new(CATEGORY_MAPPED.into(), df.text_values(CATEGORY_MAPPED)?).into(),
            Series::new(YEAR.into(), int_or_zero(YEAR)?).into(),
            Series::new(MONTH.into(), int_or_zero(MONTH)?).into(),
            Series::new(DAY_OF_WEEK.into(), int_or_zero(DAY_OF_WEEK)?).into(),
            Series::new(IS_WEEKEND.into(), weekend).into(),
            Series::new(N_TRANSACTIONS.into(), vec![1i64; height]).into(),
            Series::new(TOTAL_QTY.into(), quantity).into(),
            Series::new(GROSS_REVENUE.into(), optional_f64(GROSS_REVENUE)?).into(),
            Series::new(TREND_FOR_PRODUCT.into(), optional_f64(TREND_FOR_PRODUCT)?).into(),
            Series::new(TREND_AVG.into(), optional_f64(TREND_AVG)?).into(),
            Series::new(TREND_MAX.into(), optional_f64(TREND_MAX)?).into(),
        ];

        Ok(DataFrame::new(columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enriched() -> DataFrame {
        df!(
            "transaction_date" => ["2024-01-15", "2024-01-15", "2024-01-15", "2024-01-16"],
            "product_category_mapped" => ["coffee", "coffee", "tea", "coffee"],
            "transaction_qty" => [2.0, 1.0, 1.0, 3.0],
            "year" => [2024i32, 2024, 2024, 2024],
            "month" => [1i32, 1, 1, 1],
            "day_of_week" => [0i32, 0, 0, 1],
            "is_weekend" => [false, false, false, false],
            "date_key" => [20240115i64, 20240115, 20240115, 20240116],
            "gross_revenue" => [9.0, 3.456, 2.5, 12.0],
            "trend_for_product" => [40.0, 40.0, 11.0, 60.0],
            "trend_avg" => [25.0, 25.0, 25.0, 30.0],
            "trend_max" => [40.0, 40.0, 40.0, 60.0],
        )
        .unwrap()
    }

    #[test]
    fn test_groups_by_date_and_category() {
        let agg = DailyCategoryAggregator.aggregate(&enriched()).unwrap();

        assert_eq!(agg.height(), 3);
        assert_eq!(
            agg.text_values("sale_date").unwrap(),
            vec![
                Some("2024-01-15".to_string()),
                Some("2024-01-15".to_string()),
                Some("2024-01-16".to_string()),
            ]
        );
        assert_eq!(
            agg.text_values("product_category_mapped").unwrap(),
            vec![
                Some("coffee".to_string()),
                Some("tea".to_string()),
                Some("coffee".to_string()),
            ]
        );
        assert_eq!(
            agg.i64_values("n_transactions").unwrap(),
            vec![Some(2), Some(1), Some(1)]
        );
        assert_eq!(
            agg.f64_values("total_qty").unwrap(),
            vec![Some(3.0), Some(1.0), Some(3.0)]
        );
        assert_eq!(
            agg.f64_values("daily_revenue").unwrap(),
            vec![Some(12.46), Some(2.5), Some(12.0)]
        );
        assert_eq!(agg.f64_values("avg_revenue_per_tx").unwrap()[0], Some(6.23));
        assert_eq!(agg.f64_values("trend_max_overall").unwrap()[2], Some(60.0));
        assert_eq!(agg.i64_values("day_of_week").unwrap()[2], Some(1));
    }

    #[test]
    fn test_date_from_key_and_missing_optionals() {
        let df = df!(
            "product_category_mapped" => ["other", "other"],
            "date_key" => [20240120i64, 20240120],
            "gross_revenue" => [1.0, 2.0],
        )
        .unwrap();

        let agg = DailyCategoryAggregator.aggregate(&df).unwrap();

        assert_eq!(agg.height(), 1);
        assert_eq!(
            agg.text_values("sale_date").unwrap()[0].as_deref(),
            Some("2024-01-20")
        );
        assert_eq!(agg.f64_values("total_qty").unwrap(), vec![Some(0.0)]);
        assert_eq!(agg.f64_values("trend_avg_overall").unwrap(), vec![None]);
    }
}
