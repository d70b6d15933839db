use anyhow::{Result, anyhow};
use polars::prelude::*;

/// Columns a stage needs (`required`) or adapts to (`optional`).
///
/// Stages check their contract on entry so that a missing required column
/// fails loudly while a missing optional column only selects a fallback.
#[derive(Debug, Clone, Copy)]
pub struct ColumnContract {
    pub stage: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl ColumnContract {
    /// Returns the optional columns that are present, or an error naming
    /// the first required column that is absent.
    pub fn check(&self, df: &DataFrame) -> Result<Vec<&'static str>> {
        if let Some(missing) = self.required.iter().find(|c| !df.has_column(c)) {
            return Err(anyhow!(
                "{} requires column '{}' which is not present",
                self.stage,
                missing
            ));
        }

        Ok(self
            .optional
            .iter()
            .copied()
            .filter(|c| df.has_column(c))
            .collect())
    }
}

/// Typed, name-keyed access to a schema-evolving table.
pub trait FrameExt {
    fn has_column(&self, name: &str) -> bool;

    fn column_names_owned(&self) -> Vec<String>;

    /// First candidate that exists in the table.
    fn first_present<'a>(&self, candidates: &[&'a str]) -> Option<&'a str>;

    fn is_numeric_column(&self, name: &str) -> bool;

    /// Values coerced to f64; anything that cannot be coerced becomes `None`.
    fn f64_values(&self, name: &str) -> Result<Vec<Option<f64>>>;

    /// Values coerced to i64; anything that cannot be coerced becomes `None`.
    fn i64_values(&self, name: &str) -> Result<Vec<Option<i64>>>;

    fn text_values(&self, name: &str) -> Result<Vec<Option<String>>>;

    /// Canonical text of every value, suitable for hashing and equality
    /// joins: whole floats print as integers so `3` and `3.0` agree.
    fn key_values(&self, name: &str) -> Result<Vec<Option<String>>>;

    /// Insert or replace a column by its name.
    fn put_column(&mut self, series: Series) -> Result<()>;

    /// New table holding only rows whose mask entry is `true`.
    fn retain_rows(&self, keep: &[bool]) -> Result<DataFrame>;
}

impl FrameExt for DataFrame {
    fn has_column(&self, name: &str) -> bool {
        self.column(name).is_ok()
    }

    fn column_names_owned(&self) -> Vec<String> {
        self.get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn first_present<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates.iter().copied().find(|c| self.has_column(c))
    }

    fn is_numeric_column(&self, name: &str) -> bool {
        match self.column(name) {
            Ok(column) => is_numeric_dtype(column.dtype()),
            Err(_) => false,
        }
    }

    fn f64_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let column = self.column(name)?;
        let casted = match column.dtype() {
            DataType::String => {
                // Non-strict string casts reject surrounding whitespace, so trim first.
                let trimmed: Vec<Option<f64>> = column
                    .str()?
                    .into_iter()
                    .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
                    .collect();
                return Ok(trimmed.into_iter().map(|v| v.filter(|f| f.is_finite())).collect());
            }
            _ => column.cast(&DataType::Float64)?,
        };

        Ok(casted
            .f64()?
            .into_iter()
            .map(|v| v.filter(|f| !f.is_nan()))
            .collect())
    }

    fn i64_values(&self, name: &str) -> Result<Vec<Option<i64>>> {
        let column = self.column(name)?;
        if column.dtype() == &DataType::Int64 {
            return Ok(column.i64()?.into_iter().collect());
        }

        Ok(self
            .f64_values(name)?
            .into_iter()
            .map(|v| v.filter(|f| f.is_finite()).map(|f| f as i64))
            .collect())
    }

    fn text_values(&self, name: &str) -> Result<Vec<Option<String>>> {
        let column = self.column(name)?;
        let casted = column.cast(&DataType::String)?;

        Ok(casted
            .str()?
            .into_iter()
            .map(|v| v.map(|s| s.to_string()))
            .collect())
    }

    fn key_values(&self, name: &str) -> Result<Vec<Option<String>>> {
        let column = self.column(name)?;
        match column.dtype() {
            // Integers are formatted from their native values; going through
            // f64 would merge distinct keys above 2^53.
            DataType::Int32 | DataType::Int64 => Ok(column
                .cast(&DataType::Int64)?
                .i64()?
                .into_iter()
                .map(|v| v.map(|k| k.to_string()))
                .collect()),
            DataType::UInt32 | DataType::UInt64 => Ok(column
                .cast(&DataType::UInt64)?
                .u64()?
                .into_iter()
                .map(|v| v.map(|k| k.to_string()))
                .collect()),
            DataType::Float32 | DataType::Float64 => Ok(self
                .f64_values(name)?
                .into_iter()
                .map(|v| v.map(canonical_number))
                .collect()),
            _ => self.text_values(name),
        }
    }

    fn put_column(&mut self, series: Series) -> Result<()> {
        self.with_column(series)?;
        Ok(())
    }

    fn retain_rows(&self, keep: &[bool]) -> Result<DataFrame> {
        if keep.len() != self.height() {
            return Err(anyhow!(
                "Row mask has {} entries but table has {} rows",
                keep.len(),
                self.height()
            ));
        }

        let mask = BooleanChunked::from_slice("keep".into(), keep);
        Ok(self.filter(&mask)?)
    }
}

const ROW_ORDER: &str = "__row_order";

/// Left join that keeps the left table's row order and height, given a
/// right table with unique keys. The right key column is not kept.
pub fn left_join_in_order(
    left: &DataFrame,
    right: DataFrame,
    left_on: &str,
    right_on: &str,
) -> Result<DataFrame> {
    let mut joined = left
        .clone()
        .with_row_index(ROW_ORDER.into(), None)?
        .lazy()
        .join(
            right.lazy(),
            [col(left_on)],
            [col(right_on)],
            JoinArgs::new(JoinType::Left),
        )
        .sort_by_exprs([col(ROW_ORDER)], SortMultipleOptions::default())
        .collect()?;

    joined.drop_in_place(ROW_ORDER)?;
    if right_on != left_on && joined.has_column(right_on) {
        joined.drop_in_place(right_on)?;
    }
    Ok(joined)
}

pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int32
            | DataType::Int64
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Format a number the way it would be typed: `42` rather than `42.0`.
pub fn canonical_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_values_coerces_text() {
        let df = df!(
            "price" => [Some("4.50"), Some(" 3 "), Some("n/a"), None],
        )
        .unwrap();

        assert_eq!(
            df.f64_values("price").unwrap(),
            vec![Some(4.5), Some(3.0), None, None]
        );
    }

    #[test]
    fn test_key_values_normalise_whole_floats() {
        let df = df!(
            "id_float" => [1.0, 2.5],
            "id_int" => [1i64, 2],
        )
        .unwrap();

        assert_eq!(
            df.key_values("id_float").unwrap(),
            vec![Some("1".to_string()), Some("2.5".to_string())]
        );
        assert_eq!(
            df.key_values("id_int").unwrap(),
            vec![Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[test]
    fn test_key_values_keep_large_integers_distinct() {
        let df = df!(
            "transaction_id" => [
                9_007_199_254_740_992i64,
                9_007_199_254_740_993,
                1_234_567_890_123_456_789,
                1_234_567_890_123_456_790,
            ],
        )
        .unwrap();

        let keys = df.key_values("transaction_id").unwrap();
        assert_eq!(keys[1].as_deref(), Some("9007199254740993"));
        assert_eq!(keys[3].as_deref(), Some("1234567890123456790"));
        let distinct: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_left_join_in_order() {
        let left = df!(
            "day" => [Some("2024-01-16"), None, Some("2024-01-15"), Some("2024-01-17")],
            "qty" => [1i64, 2, 3, 4],
        )
        .unwrap();
        let right = df!(
            "date" => ["2024-01-15", "2024-01-16"],
            "coffee" => [40.0, 60.0],
        )
        .unwrap();

        let joined = left_join_in_order(&left, right, "day", "date").unwrap();

        assert_eq!(joined.height(), 4);
        assert!(!joined.has_column("date"));
        assert_eq!(
            joined.i64_values("qty").unwrap(),
            vec![Some(1), Some(2), Some(3), Some(4)]
        );
        assert_eq!(
            joined.f64_values("coffee").unwrap(),
            vec![Some(60.0), None, Some(40.0), None]
        );
    }

    #[test]
    fn test_retain_rows_and_contract() {
        let df = df!(
            "a" => [1i64, 2, 3],
            "b" => ["x", "y", "z"],
        )
        .unwrap();

        let kept = df.retain_rows(&[true, false, true]).unwrap();
        assert_eq!(kept.height(), 2);
        assert!(df.retain_rows(&[true]).is_err());

        let contract = ColumnContract {
            stage: "test",
            required: &["a"],
            optional: &["b", "c"],
        };
        assert_eq!(contract.check(&df).unwrap(), vec!["b"]);

        let strict = ColumnContract {
            stage: "test",
            required: &["missing"],
            optional: &[],
        };
        assert!(strict.check(&df).is_err());
    }

    #[test]
    fn test_first_present() {
        let df = df!("qty" => [1i64]).unwrap();
        assert_eq!(
            df.first_present(&["transaction_qty", "quantity", "qty"]),
            Some("qty")
        );
        assert_eq!(df.first_present(&["nope"]), None);
    }
}
