use anyhow::{Result, anyhow};
use polars::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{info, warn};

use super::FrameExt;
use super::columns::{SYNTHETIC_KEY, SYNTHETIC_KEY_CANDIDATES, TRANSACTION_ID};
use crate::models::PrimaryKey;

pub struct Deduplicator;

impl Deduplicator {
    /// Natural `transaction_id` when available, otherwise a synthetic key
    /// over the preferred candidates (or the first three columns).
    pub fn resolve_key(&self, df: &DataFrame) -> PrimaryKey {
        if df.has_column(TRANSACTION_ID) {
            return PrimaryKey {
                column: TRANSACTION_ID.to_string(),
                synthetic: false,
                source_columns: Vec::new(),
            };
        }

        let mut source_columns: Vec<String> = SYNTHETIC_KEY_CANDIDATES
            .iter()
            .filter(|c| df.has_column(c))
            .map(|c| c.to_string())
            .collect();

        if source_columns.is_empty() {
            source_columns = df.column_names_owned().into_iter().take(3).collect();
        }

        PrimaryKey {
            column: SYNTHETIC_KEY.to_string(),
            synthetic: true,
            source_columns,
        }
    }

    /// Materialize a synthetic key column. No-op for natural keys.
    pub fn assign_key(&self, df: &mut DataFrame, key: &PrimaryKey) -> Result<()> {
        if !key.synthetic {
            return Ok(());
        }

        let hashes = self.synthetic_keys(df, &key.source_columns)?;
        df.put_column(Series::new(key.column.as_str().into(), hashes))?;
        Ok(())
    }

    /// Row-content hash over `columns`. Depends only on the values, never on
    /// row position, so the same row hashes identically in any table.
    pub fn synthetic_keys(&self, df: &DataFrame, columns: &[String]) -> Result<Vec<i64>> {
        let missing: Vec<&String> = columns.iter().filter(|c| !df.has_column(c)).collect();
        if !missing.is_empty() {
            return Err(anyhow!("Cannot build synthetic key, missing columns: {:?}", missing));
        }

        let value_columns = columns
            .iter()
            .map(|c| df.key_values(c))
            .collect::<Result<Vec<_>>>()?;

        let keys = (0..df.height())
            .map(|row| {
                let mut hasher = DefaultHasher::new();
                for values in &value_columns {
                    match &values[row] {
                        Some(text) => {
                            1u8.hash(&mut hasher);
                            text.hash(&mut hasher);
                        }
                        None => 0u8.hash(&mut hasher),
                    }
                }
                hasher.finish() as i64
            })
            .collect();

        Ok(keys)
    }

    /// Keep the first occurrence of every key value, in table order.
    pub fn drop_duplicate_keys(&self, df: &DataFrame, column: &str) -> Result<(DataFrame, usize)> {
        if !df.has_column(column) {
            return Err(anyhow!("Cannot deduplicate, key column '{}' is missing", column));
        }

        let deduped = df.unique_stable(Some(&[column.to_string()]), UniqueKeepStrategy::First, None)?;
        let removed = df.height() - deduped.height();
        Ok((deduped, removed))
    }

    pub fn deduplicate(&self, mut df: DataFrame) -> Result<(DataFrame, PrimaryKey, usize)> {
        let key = self.resolve_key(&df);
        self.assign_key(&mut df, &key)?;

        if key.synthetic {
            info!(
                "No transaction_id column, using synthetic key '{}' over {:?}",
                key.column, key.source_columns
            );
        }

        let before = df.height();
        let (df, removed) = self.drop_duplicate_keys(&df, &key.column)?;

        if removed > 0 {
            warn!("Removed {} duplicate rows on '{}' ({} -> {})", removed, key.column, before, df.height());
        } else {
            info!("No duplicate rows on '{}'", key.column);
        }

        Ok((df, key, removed))
    }
}
