use anyhow::Result;
use polars::prelude::*;
use tracing::{info, warn};

use super::FrameExt;
use super::frame_ext::left_join_in_order;
use super::columns::{DATE_CANDIDATES, PARTIAL_FLAGS, SALE_DATE, TREND_DATE, TREND_DATE_CANDIDATES};
use super::datetime::{format_date, parse_date};

const MATCHED: &str = "__trend_matched";

pub struct JoinReport {
    pub joined: bool,
    pub trend_columns: Vec<String>,
    pub matched_rows: usize,
}

/// Aligns the trends series to days and left-joins it onto transactions.
pub struct TrendJoiner;

impl TrendJoiner {
    /// Rename the trends date column to `trend_date` and normalize it to a
    /// calendar date (unparseable -> missing).
    pub fn prepare_trends(&self, trends: &mut DataFrame) -> Result<()> {
        let date_col = match trends.first_present(TREND_DATE_CANDIDATES) {
            Some(name) => name.to_string(),
            None => trends.column_names_owned().into_iter().next().unwrap_or_default(),
        };

        if date_col != TREND_DATE {
            trends.rename(&date_col, TREND_DATE.into())?;
        }

        let parsed: Vec<Option<String>> = trends
            .text_values(TREND_DATE)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_date).map(|d| format_date(&d)))
            .collect();
        trends.put_column(Series::new(TREND_DATE.into(), parsed))?;
        Ok(())
    }

    /// Every column except the date and the partial-data flag.
    pub fn value_columns(&self, trends: &DataFrame) -> Vec<String> {
        trends
            .column_names_owned()
            .into_iter()
            .filter(|c| c != TREND_DATE && !PARTIAL_FLAGS.contains(&c.as_str()))
            .collect()
    }

    /// One row per calendar date; same-day samples are averaged, ignoring
    /// missing values. Rows without a parseable date are dropped.
    pub fn aggregate_daily(&self, trends: &DataFrame) -> Result<DataFrame> {
        let value_columns = self.value_columns(trends);

        let mut columns: Vec<Column> = Vec::with_capacity(value_columns.len() + 1);
        columns.push(Series::new(TREND_DATE.into(), trends.text_values(TREND_DATE)?).into());
        for name in &value_columns {
            columns.push(Series::new(name.as_str().into(), trends.f64_values(name)?).into());
        }

        let daily = DataFrame::new(columns)?
            .lazy()
            .filter(col(TREND_DATE).is_not_null())
            .group_by([col(TREND_DATE)])
            .agg(value_columns.iter().map(|c| col(c.as_str()).mean()).collect::<Vec<_>>())
            .sort_by_exprs([col(TREND_DATE)], SortMultipleOptions::default())
            .collect()?;

        info!(
            "Aggregated {} trend samples into {} daily rows",
            trends.height(),
            daily.height()
        );
        Ok(daily)
    }

    /// Left join by calendar date. Tables without a transaction date pass
    /// through unchanged.
    pub fn join(&self, sales: &mut DataFrame, daily: &DataFrame) -> Result<JoinReport> {
        let Some(date_col) = sales.first_present(DATE_CANDIDATES) else {
            warn!("Transactions have no date column, skipping trends join");
            return Ok(JoinReport {
                joined: false,
                trend_columns: Vec::new(),
                matched_rows: 0,
            });
        };

        let sale_dates: Vec<Option<String>> = sales
            .text_values(date_col)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_date).map(|d| format_date(&d)))
            .collect();
        sales.put_column(Series::new(SALE_DATE.into(), sale_dates))?;

        let mut right: Vec<Column> =
            vec![Series::new(TREND_DATE.into(), daily.text_values(TREND_DATE)?).into()];
        let mut trend_columns = Vec::new();
        for name in self.value_columns(daily) {
            let target = if sales.has_column(&name) {
                warn!("Transactions already have '{}', joining trend as '{}_trend'", name, name);
                format!("{}_trend", name)
            } else {
                name.clone()
            };
            right.push(Series::new(target.as_str().into(), daily.f64_values(&name)?).into());
            trend_columns.push(target);
        }
        right.push(Series::new(MATCHED.into(), vec![true; daily.height()]).into());

        let mut joined = left_join_in_order(sales, DataFrame::new(right)?, SALE_DATE, TREND_DATE)?;
        let matched_rows = joined.height() - joined.column(MATCHED)?.null_count();
        joined.drop_in_place(MATCHED)?;
        *sales = joined;

        info!(
            "Joined {} trend columns, {} of {} transactions matched a trend date",
            trend_columns.len(),
            matched_rows,
            sales.height()
        );

        Ok(JoinReport {
            joined: true,
            trend_columns,
            matched_rows,
        })
    }
}
