use anyhow::{Result, anyhow};
use polars::prelude::*;
use regex::Regex;
use tracing::{info, warn};

use super::FrameExt;
use super::frame_ext::left_join_in_order;
use super::columns::{CATEGORY_MAPPED, MAPPER_SOURCE_CANDIDATES, TREND_AVG, TREND_FOR_PRODUCT};
use crate::models::PrimaryKey;

pub const OTHER: &str = "other";

const LOOKUP_KEY: &str = "__lookup_key";

/// Maps free product text onto a closed set of categories and derives the
/// per-row product trend.
pub struct CategoryMapper {
    rules: Vec<(Regex, &'static str)>,
}

impl CategoryMapper {
    pub fn new() -> Result<Self> {
        // First match wins; chocolate and tea come before coffee so that
        // "Hot chocolate" or "Brewed Chai tea" are not claimed by "brew".
        let rules = vec![
            (Regex::new(r"chocolate|cocoa")?, "chocolate"),
            (Regex::new(r"\btea\b|chai|matcha")?, "tea"),
            (
                Regex::new(r"coffee|espresso|latte|cappuccino|americano|mocha|barista|beans|brew")?,
                "coffee",
            ),
            (
                Regex::new(r"bakery|scone|biscotti|pastry|croissant|muffin|cake|bread|cookie|donut|bagel")?,
                "bakery",
            ),
        ];

        Ok(CategoryMapper { rules })
    }

    /// Total on any input: unrecognized or missing text maps to `other`.
    pub fn map_text(&self, text: Option<&str>) -> &'static str {
        let Some(text) = text else {
            return OTHER;
        };
        let lowered = text.to_lowercase();

        self.rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(&lowered))
            .map(|(_, category)| *category)
            .unwrap_or(OTHER)
    }

    /// (key, category) pairs from the raw (pre-transform) table, first
    /// occurrence per key. `None` when the raw table has no usable source
    /// column.
    pub fn build_lookup(&self, raw: &DataFrame, key: &PrimaryKey) -> Result<Option<DataFrame>> {
        let Some(source) = raw.first_present(MAPPER_SOURCE_CANDIDATES) else {
            return Ok(None);
        };

        if !raw.has_column(&key.column) {
            return Err(anyhow!(
                "Raw table has no '{}' column to build the category lookup",
                key.column
            ));
        }

        let categories: Vec<&str> = raw
            .text_values(source)?
            .iter()
            .map(|text| self.map_text(text.as_deref()))
            .collect();

        let lookup = DataFrame::new(vec![
            Series::new(LOOKUP_KEY.into(), raw.key_values(&key.column)?).into(),
            Series::new(CATEGORY_MAPPED.into(), categories).into(),
        ])?
        .lazy()
        .filter(col(LOOKUP_KEY).is_not_null())
        .collect()?
        .unique_stable(Some(&[LOOKUP_KEY.to_string()]), UniqueKeepStrategy::First, None)?;

        info!("Built category lookup from '{}' with {} keys", source, lookup.height());
        Ok(Some(lookup))
    }

    /// Left-join the mapped category onto the merged table by key.
    pub fn attach(&self, merged: &mut DataFrame, raw: &DataFrame, key: &PrimaryKey) -> Result<()> {
        let Some(lookup) = self.build_lookup(raw, key)? else {
            warn!("No product type/detail column in raw sales, mapping every row to '{}'", OTHER);
            merged.put_column(Series::new(CATEGORY_MAPPED.into(), vec![OTHER; merged.height()]))?;
            return Ok(());
        };

        let mut keyed = merged.clone();
        if keyed.has_column(CATEGORY_MAPPED) {
            keyed.drop_in_place(CATEGORY_MAPPED)?;
        }
        keyed.put_column(Series::new(LOOKUP_KEY.into(), merged.key_values(&key.column)?))?;

        let mut joined = left_join_in_order(&keyed, lookup, LOOKUP_KEY, LOOKUP_KEY)?;
        joined.drop_in_place(LOOKUP_KEY)?;
        *merged = joined;
        Ok(())
    }

    pub fn drop_unmapped(&self, df: &DataFrame) -> Result<(DataFrame, usize)> {
        let kept = df
            .clone()
            .lazy()
            .filter(col(CATEGORY_MAPPED).is_not_null())
            .collect()?;
        let dropped = df.height() - kept.height();

        if dropped > 0 {
            warn!("Dropped {} rows without a mapped category", dropped);
        }
        Ok((kept, dropped))
    }

    /// Each row takes the trend column named by its mapped category, then
    /// falls back to the row's overall trend average, then to 0.
    pub fn add_trend_for_product(&self, df: &mut DataFrame, keywords: &[String]) -> Result<()> {
        for keyword in keywords {
            if !df.has_column(keyword) {
                df.put_column(Series::new(
                    keyword.as_str().into(),
                    vec![None::<f64>; df.height()],
                ))?;
            }
        }

        let fallback = if df.has_column(TREND_AVG) {
            col(TREND_AVG).cast(DataType::Float64)
        } else {
            lit(0.0)
        };

        let selected = keywords.iter().rev().fold(fallback.clone(), |otherwise, keyword| {
            when(col(CATEGORY_MAPPED).eq(lit(keyword.as_str())))
                .then(col(keyword.as_str()).cast(DataType::Float64))
                .otherwise(otherwise)
        });

        *df = df
            .clone()
            .lazy()
            .with_column(
                selected
                    .fill_null(fallback)
                    .fill_null(lit(0.0))
                    .alias(TREND_FOR_PRODUCT),
            )
            .collect()?;
        Ok(())
    }
}
