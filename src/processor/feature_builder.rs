use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use tracing::info;

use super::{FrameExt, stats};
use super::columns::{
    AMOUNT_CANDIDATES, DATE_CANDIDATES, DATE_KEY, DAY_OF_WEEK, GROSS_REVENUE, IS_WEEKEND, MONTH,
    QUANTITY_CANDIDATES, REV_PER_UNIT, TREND_AVG, TREND_MAX, UNIT_PRICE, YEAR,
};
use super::datetime::{date_key, parse_date};

/// Calendar, revenue and trend-summary features on the merged table.
pub struct FeatureBuilder {
    trend_keywords: Vec<String>,
}

impl FeatureBuilder {
    pub fn new(trend_keywords: &[String]) -> Self {
        FeatureBuilder {
            trend_keywords: trend_keywords.to_vec(),
        }
    }

    pub fn build(&self, df: &mut DataFrame) -> Result<()> {
        self.add_calendar_features(df)?;
        self.add_revenue(df)?;
        self.add_trend_summary(df)?;
        info!("Added calendar, revenue and trend summary features");
        Ok(())
    }

    /// year, month, day_of_week (Monday = 0), is_weekend and date_key.
    /// Rows without a valid date get zeros.
    pub fn add_calendar_features(&self, df: &mut DataFrame) -> Result<()> {
        let dates: Vec<Option<NaiveDate>> = match df.first_present(DATE_CANDIDATES) {
            Some(column) => df
                .text_values(column)?
                .iter()
                .map(|v| v.as_deref().and_then(parse_date))
                .collect(),
            None => vec![None; df.height()],
        };

        let years: Vec<i32> = dates.iter().map(|d| d.map_or(0, |d| d.year())).collect();
        let months: Vec<i32> = dates.iter().map(|d| d.map_or(0, |d| d.month() as i32)).collect();
        let weekdays: Vec<i32> = dates
            .iter()
            .map(|d| d.map_or(0, |d| d.weekday().num_days_from_monday() as i32))
            .collect();
        let weekends: Vec<bool> = weekdays
            .iter()
            .zip(dates.iter())
            .map(|(w, d)| d.is_some() && *w >= 5)
            .collect();
        let keys: Vec<i64> = dates.iter().map(|d| d.as_ref().map_or(0, date_key)).collect();

        df.put_column(Series::new(YEAR.into(), years))?;
        df.put_column(Series::new(MONTH.into(), months))?;
        df.put_column(Series::new(DAY_OF_WEEK.into(), weekdays))?;
        df.put_column(Series::new(IS_WEEKEND.into(), weekends))?;
        df.put_column(Series::new(DATE_KEY.into(), keys))?;
        Ok(())
    }

    /// gross_revenue = unit_price * quantity, else a direct amount column,
    /// else 0. rev_per_unit never divides by a zero quantity.
    pub fn add_revenue(&self, df: &mut DataFrame) -> Result<()> {
        let quantity_col = df.first_present(QUANTITY_CANDIDATES);
        let quantities = match quantity_col {
            Some(column) => df.f64_values(column)?,
            None => vec![None; df.height()],
        };

        let revenue: Vec<Option<f64>> = match (df.has_column(UNIT_PRICE), quantity_col) {
            (true, Some(_)) => df
                .f64_values(UNIT_PRICE)?
                .iter()
                .zip(quantities.iter())
                .map(|(price, qty)| match (price, qty) {
                    (Some(p), Some(q)) => Some(p * q),
                    _ => None,
                })
                .collect(),
            _ => match df.first_present(AMOUNT_CANDIDATES) {
                Some(amount) => df.f64_values(amount)?,
                None => vec![Some(0.0); df.height()],
            },
        };

        let per_unit: Vec<f64> = revenue
            .iter()
            .zip(quantities.iter())
            .map(|(rev, qty)| match qty {
                Some(q) if *q > 0.0 => rev.unwrap_or(0.0) / q,
                _ => 0.0,
            })
            .collect();

        df.put_column(Series::new(GROSS_REVENUE.into(), revenue))?;
        df.put_column(Series::new(REV_PER_UNIT.into(), per_unit))?;
        Ok(())
    }

    /// Row-wise mean and max over whichever keyword trend columns exist.
    pub fn add_trend_summary(&self, df: &mut DataFrame) -> Result<()> {
        let present: Vec<Vec<Option<f64>>> = self
            .trend_keywords
            .iter()
            .filter(|k| df.has_column(k))
            .map(|k| df.f64_values(k))
            .collect::<Result<_>>()?;

        let mut avg = Vec::with_capacity(df.height());
        let mut max = Vec::with_capacity(df.height());
        for row in 0..df.height() {
            let row_values: Vec<f64> = present.iter().filter_map(|c| c[row]).collect();
            avg.push(stats::mean(&row_values));
            max.push(row_values.iter().copied().reduce(f64::max));
        }

        df.put_column(Series::new(TREND_AVG.into(), avg))?;
        df.put_column(Series::new(TREND_MAX.into(), max))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformConfig;

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(&TransformConfig::default().trend_keywords)
    }

    #[test]
    fn test_example_transaction_features() {
        let mut df = df!(
            "transaction_date" => ["2024-01-15"],
            "unit_price" => [4.50],
            "transaction_qty" => [2.0],
        )
        .unwrap();

        builder().build(&mut df).unwrap();

        assert_eq!(df.f64_values("gross_revenue").unwrap(), vec![Some(9.0)]);
        assert_eq!(df.f64_values("rev_per_unit").unwrap(), vec![Some(4.5)]);
        assert_eq!(df.i64_values("day_of_week").unwrap(), vec![Some(0)]);
        assert_eq!(df.i64_values("date_key").unwrap(), vec![Some(20240115)]);
        assert_eq!(df.i64_values("year").unwrap(), vec![Some(2024)]);
        assert_eq!(df.i64_values("month").unwrap(), vec![Some(1)]);
        assert_eq!(
            df.text_values("is_weekend").unwrap(),
            vec![Some("false".to_string())]
        );
    }

    #[test]
    fn test_weekend_and_invalid_dates() {
        let mut df = df!(
            "transaction_date" => [Some("2024-01-20"), Some("2024-01-21"), None],
        )
        .unwrap();

        builder().add_calendar_features(&mut df).unwrap();

        assert_eq!(
            df.text_values("is_weekend").unwrap(),
            vec![Some("true".to_string()), Some("true".to_string()), Some("false".to_string())]
        );
        assert_eq!(
            df.i64_values("date_key").unwrap(),
            vec![Some(20240120), Some(20240121), Some(0)]
        );
        assert_eq!(df.i64_values("year").unwrap()[2], Some(0));
    }

    #[test]
    fn test_calendar_defaults_without_date_column() {
        let mut df = df!("unit_price" => [1.0, 2.0]).unwrap();
        builder().add_calendar_features(&mut df).unwrap();

        assert_eq!(df.i64_values("date_key").unwrap(), vec![Some(0), Some(0)]);
        assert_eq!(df.i64_values("day_of_week").unwrap(), vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_zero_quantity_never_divides() {
        let mut df = df!(
            "unit_price" => [3.0, 3.0],
            "transaction_qty" => [0.0, -1.0],
        )
        .unwrap();

        builder().add_revenue(&mut df).unwrap();

        assert_eq!(df.f64_values("rev_per_unit").unwrap(), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_revenue_fallbacks() {
        let mut with_amount = df!("total_bill" => [12.5]).unwrap();
        builder().add_revenue(&mut with_amount).unwrap();
        assert_eq!(with_amount.f64_values("gross_revenue").unwrap(), vec![Some(12.5)]);
        assert_eq!(with_amount.f64_values("rev_per_unit").unwrap(), vec![Some(0.0)]);

        let mut bare = df!("store_id" => [1i64]).unwrap();
        builder().add_revenue(&mut bare).unwrap();
        assert_eq!(bare.f64_values("gross_revenue").unwrap(), vec![Some(0.0)]);
    }

    #[test]
    fn test_trend_summary() {
        let mut df = df!(
            "coffee" => [Some(40.0), None],
            "tea" => [Some(20.0), None],
        )
        .unwrap();

        builder().add_trend_summary(&mut df).unwrap();

        assert_eq!(df.f64_values("trend_avg").unwrap(), vec![Some(30.0), None]);
        assert_eq!(df.f64_values("trend_max").unwrap(), vec![Some(40.0), None]);

        let mut none = df!("unit_price" => [1.0]).unwrap();
        builder().add_trend_summary(&mut none).unwrap();
        assert_eq!(none.f64_values("trend_avg").unwrap(), vec![None]);
    }
}
