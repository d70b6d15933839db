use anyhow::{Result, anyhow};
use polars::prelude::*;
use tracing::{info, warn};

use super::columns::{DATE_CANDIDATES, DATE_KEY, GROSS_REVENUE};
use super::datetime::{date_key, parse_date};
use super::deduplicator::Deduplicator;
use super::frame_ext::ColumnContract;
use super::{FrameExt, stats};
use crate::models::DqRuleOutcome;

pub const CONTRACT: ColumnContract = ColumnContract {
    stage: "data quality validator",
    required: &[DATE_KEY, GROSS_REVENUE],
    optional: &["transaction_date", "date"],
};

/// Six ordered rule checks over the merged table, each with an automatic
/// repair. Later rules rely on the repairs of earlier ones.
pub struct DqValidator {
    ratio_limit: f64,
}

impl DqValidator {
    pub fn new(ratio_limit: f64) -> Self {
        DqValidator { ratio_limit }
    }

    pub fn validate_and_repair(&self, df: DataFrame, pk: &str) -> Result<(DataFrame, Vec<DqRuleOutcome>)> {
        CONTRACT.check(&df)?;
        if !df.has_column(pk) {
            return Err(anyhow!("{} requires key column '{}'", CONTRACT.stage, pk));
        }

        let mut outcomes = Vec::with_capacity(6);

        let (df, uniqueness) = self.check_uniqueness(df, pk)?;
        outcomes.push(uniqueness);
        let (mut df, nulls) = self.check_nulls(df, pk)?;
        outcomes.push(nulls);
        outcomes.push(self.check_range(&mut df)?);
        outcomes.push(self.check_datatype(&mut df)?);
        outcomes.push(self.check_referential_integrity(&mut df)?);
        outcomes.push(self.check_distribution(&mut df)?);

        let failed: Vec<&str> = outcomes.iter().filter(|o| !o.ok).map(|o| o.rule.as_str()).collect();
        if failed.is_empty() {
            info!("All {} data quality rules passed", outcomes.len());
        } else {
            warn!("Data quality rules repaired: {:?}", failed);
        }

        Ok((df, outcomes))
    }

    /// Second full pass over already repaired data. Expected to pass every
    /// rule; its outcomes are reported separately.
    pub fn verify(&self, df: DataFrame, pk: &str) -> Result<(DataFrame, Vec<DqRuleOutcome>)> {
        let (df, outcomes) = self.validate_and_repair(df, pk)?;
        if outcomes.iter().all(|o| o.ok) {
            info!("Verification pass: data quality rules hold");
        } else {
            warn!("Verification pass still found failing rules");
        }
        Ok((df, outcomes))
    }

    fn check_uniqueness(&self, df: DataFrame, pk: &str) -> Result<(DataFrame, DqRuleOutcome)> {
        let (deduped, removed) = Deduplicator.drop_duplicate_keys(&df, pk)?;
        let ok = removed == 0;

        Ok((
            deduped,
            outcome("uniqueness_check", pk, ok, format!("dropped {} duplicate rows", removed)),
        ))
    }

    fn check_nulls(&self, df: DataFrame, pk: &str) -> Result<(DataFrame, DqRuleOutcome)> {
        let critical = [pk, DATE_KEY, GROSS_REVENUE];
        let mut nulls = 0;
        for name in critical {
            nulls += df.column(name)?.null_count();
        }
        // NaN counts as missing revenue.
        nulls += df.f64_values(GROSS_REVENUE)?.iter().filter(|v| v.is_none()).count()
            - df.column(GROSS_REVENUE)?.null_count();

        let target = critical.join(",");
        if nulls == 0 {
            return Ok((df, outcome("null_check", &target, true, String::new())));
        }

        let keep: Vec<bool> = df.key_values(pk)?.iter().map(|k| k.is_some()).collect();
        let mut df = df.retain_rows(&keep)?;
        let dropped = keep.iter().filter(|k| !**k).count();

        let revenue: Vec<f64> = df
            .f64_values(GROSS_REVENUE)?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect();
        let keys: Vec<i64> = df
            .i64_values(DATE_KEY)?
            .into_iter()
            .map(|v| v.unwrap_or(0))
            .collect();
        df.put_column(Series::new(GROSS_REVENUE.into(), revenue))?;
        df.put_column(Series::new(DATE_KEY.into(), keys))?;

        Ok((
            df,
            outcome(
                "null_check",
                &target,
                false,
                format!("dropped {} rows without key, filled revenue/date_key with 0", dropped),
            ),
        ))
    }

    fn check_range(&self, df: &mut DataFrame) -> Result<DqRuleOutcome> {
        let revenue = df.f64_values(GROSS_REVENUE)?;
        let negative = revenue.iter().filter(|v| v.unwrap_or(0.0) < 0.0).count();
        let target = "gross_revenue>=0";

        if negative == 0 {
            return Ok(outcome("range_check", target, true, String::new()));
        }

        let clamped: Vec<Option<f64>> = revenue.into_iter().map(|v| v.map(|x| x.max(0.0))).collect();
        df.put_column(Series::new(GROSS_REVENUE.into(), clamped))?;

        Ok(outcome(
            "range_check",
            target,
            false,
            format!("clamped {} negative values to 0", negative),
        ))
    }

    fn check_datatype(&self, df: &mut DataFrame) -> Result<DqRuleOutcome> {
        let target = "date_key:int64";
        if df.column(DATE_KEY)?.dtype() == &DataType::Int64 {
            return Ok(outcome("datatype_consistency", target, true, String::new()));
        }

        let coerced: Vec<i64> = df
            .i64_values(DATE_KEY)?
            .into_iter()
            .map(|v| v.unwrap_or(0))
            .collect();
        df.put_column(Series::new(DATE_KEY.into(), coerced))?;

        Ok(outcome(
            "datatype_consistency",
            target,
            false,
            "coerced date_key to int64, non-numeric -> 0".to_string(),
        ))
    }

    /// date_key is non-zero exactly when the transaction date parses.
    fn check_referential_integrity(&self, df: &mut DataFrame) -> Result<DqRuleOutcome> {
        let target = "date_key <-> transaction_date";
        let Some(date_col) = df.first_present(DATE_CANDIDATES) else {
            return Ok(outcome("referential_integrity", target, true, String::new()));
        };

        let dates: Vec<_> = df
            .text_values(date_col)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_date))
            .collect();
        let keys = df.i64_values(DATE_KEY)?;

        let mismatched = dates
            .iter()
            .zip(keys.iter())
            .filter(|(d, k)| (k.unwrap_or(0) != 0) != d.is_some())
            .count();

        if mismatched == 0 {
            return Ok(outcome("referential_integrity", target, true, String::new()));
        }

        let repaired: Vec<i64> = dates
            .iter()
            .zip(keys.iter())
            .map(|(d, k)| match d {
                None => 0,
                Some(date) if k.unwrap_or(0) == 0 => date_key(date),
                Some(_) => k.unwrap_or(0),
            })
            .collect();
        df.put_column(Series::new(DATE_KEY.into(), repaired))?;

        Ok(outcome(
            "referential_integrity",
            target,
            false,
            format!("realigned date_key on {} rows", mismatched),
        ))
    }

    /// p99 / median of gross revenue must stay within the ratio limit.
    fn check_distribution(&self, df: &mut DataFrame) -> Result<DqRuleOutcome> {
        let target = format!("gross_revenue p99/median<={}", self.ratio_limit);
        let revenue = df.f64_values(GROSS_REVENUE)?;
        let (Some(p99), Some(median)) = (stats::quantile(&revenue, 0.99), stats::median(&revenue))
        else {
            return Ok(outcome(
                "distribution_check",
                &target,
                false,
                "no revenue values, nothing to repair".to_string(),
            ));
        };

        if self.within_limit(p99, median) {
            return Ok(outcome("distribution_check", &target, true, String::new()));
        }

        let mut cap = p99;
        let clipped = Self::cap_values(&revenue, cap);
        let recheck = stats::quantile(&clipped, 0.99).unwrap_or(cap);
        if !self.within_limit(recheck, median) {
            // Interpolated p99 can stay above the limit after one clip.
            cap = self.ratio_limit * median;
        }

        df.put_column(Series::new(GROSS_REVENUE.into(), Self::cap_values(&revenue, cap)))?;

        Ok(outcome(
            "distribution_check",
            &target,
            false,
            format!("clipped gross_revenue at {:.4} (p99 {:.4}, median {:.4})", cap, p99, median),
        ))
    }

    fn within_limit(&self, p99: f64, median: f64) -> bool {
        median == 0.0 || p99 / median <= self.ratio_limit
    }

    fn cap_values(values: &[Option<f64>], cap: f64) -> Vec<Option<f64>> {
        values.iter().map(|v| v.map(|x| x.min(cap))).collect()
    }
}

fn outcome(rule: &str, target: &str, ok: bool, repair: String) -> DqRuleOutcome {
    DqRuleOutcome {
        rule: rule.to_string(),
        target: target.to_string(),
        ok,
        repair: if ok { None } else { Some(repair) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> DqValidator {
        DqValidator::new(50.0)
    }

    fn clean_table() -> DataFrame {
        df!(
            "transaction_id" => [1i64, 2, 3, 4],
            "transaction_date" => ["2024-01-15", "2024-01-15", "2024-01-16", "2024-01-16"],
            "date_key" => [20240115i64, 20240115, 20240116, 20240116],
            "gross_revenue" => [3.0, 4.5, 6.0, 2.0],
        )
        .unwrap()
    }

    #[test]
    fn test_clean_table_passes_every_rule() {
        let (df, outcomes) = validator()
            .validate_and_repair(clean_table(), "transaction_id")
            .unwrap();

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.ok), "{:?}", outcomes);
        assert_eq!(df.height(), 4);
    }

    #[test]
    fn test_repairs_then_verification_passes() {
        let dirty = df!(
            "transaction_id" => [Some(1i64), Some(1), Some(2), None, Some(4), Some(5)],
            "transaction_date" => [Some("2024-01-15"), Some("2024-01-15"), None, Some("2024-01-16"), Some("2024-01-16"), Some("2024-01-17")],
            "date_key" => [Some(20240115i64), Some(20240115), Some(20240101), Some(20240116), None, Some(20240117)],
            "gross_revenue" => [Some(3.0), Some(3.0), Some(-4.0), Some(1.0), None, Some(5.0)],
        )
        .unwrap();

        let (repaired, first) = validator().validate_and_repair(dirty, "transaction_id").unwrap();
        let by_rule = |name: &str| first.iter().find(|o| o.rule == name).unwrap().ok;

        assert!(!by_rule("uniqueness_check"));
        assert!(!by_rule("null_check"));
        assert!(!by_rule("range_check"));
        assert!(!by_rule("referential_integrity"));

        // duplicate of 1 and the null key are gone
        assert_eq!(repaired.height(), 4);
        let revenue = repaired.f64_values("gross_revenue").unwrap();
        assert!(revenue.iter().all(|v| v.unwrap() >= 0.0));

        let (_, second) = validator().verify(repaired, "transaction_id").unwrap();
        assert!(second.iter().all(|o| o.ok), "{:?}", second);
    }

    #[test]
    fn test_date_key_tracks_parsed_date() {
        let df = df!(
            "transaction_id" => [1i64, 2],
            "transaction_date" => [None, Some("2024-01-16")],
            "date_key" => [20240115i64, 0],
            "gross_revenue" => [1.0, 1.0],
        )
        .unwrap();

        let (df, outcomes) = validator().validate_and_repair(df, "transaction_id").unwrap();

        assert!(!outcomes[4].ok);
        assert_eq!(
            df.i64_values("date_key").unwrap(),
            vec![Some(0), Some(20240116)]
        );
    }

    #[test]
    fn test_datatype_rule_coerces_text_keys() {
        let df = df!(
            "transaction_id" => [1i64, 2],
            "date_key" => ["20240115", "junk"],
            "gross_revenue" => [1.0, 1.0],
        )
        .unwrap();

        let (df, outcomes) = validator().validate_and_repair(df, "transaction_id").unwrap();

        assert_eq!(outcomes[3].rule, "datatype_consistency");
        assert!(!outcomes[3].ok);
        assert_eq!(df.column("date_key").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.i64_values("date_key").unwrap(), vec![Some(20240115), Some(0)]);
    }

    #[test]
    fn test_distribution_clip_is_stable() {
        let mut revenue: Vec<f64> = vec![1.0; 99];
        revenue.push(10_000.0);
        let ids: Vec<i64> = (0..100).collect();
        let keys: Vec<i64> = vec![0; 100];

        let df = df!(
            "transaction_id" => ids,
            "date_key" => keys,
            "gross_revenue" => revenue,
        )
        .unwrap();

        let (df, first) = validator().validate_and_repair(df, "transaction_id").unwrap();
        assert!(!first[5].ok);

        let max = df
            .f64_values("gross_revenue")
            .unwrap()
            .into_iter()
            .flatten()
            .fold(f64::NEG_INFINITY, f64::max);
        // capped at the interpolated p99 (about 101), far below the outlier
        assert!(max > 1.0 && max < 102.0);

        let (_, second) = validator().verify(df, "transaction_id").unwrap();
        assert!(second[5].ok);
    }

    #[test]
    fn test_empty_table_fails_distribution_only() {
        let df = clean_table().head(Some(0));
        let (_, outcomes) = validator().validate_and_repair(df, "transaction_id").unwrap();

        assert!(outcomes[..5].iter().all(|o| o.ok));
        assert!(!outcomes[5].ok);
    }
}
