use anyhow::{Context, Result, anyhow};
use polars::prelude::*;
use regex::Regex;
use std::path::Path;
use tracing::info;

use super::FrameExt;

/// Rows sampled for CSV type inference.
const INFER_SCHEMA_ROWS: usize = 10_000;

pub struct SourceLoader {
    separators: Regex,
}

impl SourceLoader {
    pub fn new() -> Result<Self> {
        Ok(SourceLoader {
            // whitespace, dashes, dots and slashes all collapse to one underscore
            separators: Regex::new(r"[\s\-./]+")?,
        })
    }

    /// Read both raw tables and rewrite their headers to snake_case.
    pub fn load_sources(&self, sales_path: &Path, trends_path: &Path) -> Result<(DataFrame, DataFrame)> {
        let sales = self.load_table(sales_path)?;
        let trends = self.load_table(trends_path)?;
        Ok((sales, trends))
    }

    pub fn load_table(&self, path: &Path) -> Result<DataFrame> {
        let mut df = read_csv(path)?;

        if df.width() == 0 {
            return Err(anyhow!("Table {} has no columns", path.display()));
        }

        self.normalize_column_names(&mut df)?;
        info!(
            "Loaded {} with {} rows and {} columns",
            path.display(),
            df.height(),
            df.width()
        );
        Ok(df)
    }

    pub fn normalize_column_names(&self, df: &mut DataFrame) -> Result<()> {
        for original in df.column_names_owned() {
            let normalized = self.to_snake_case(&original);
            if normalized != original {
                if df.has_column(&normalized) {
                    return Err(anyhow!(
                        "Column '{}' normalizes to '{}' which already exists",
                        original,
                        normalized
                    ));
                }
                df.rename(&original, normalized.into())?;
            }
        }
        Ok(())
    }

    pub fn to_snake_case(&self, name: &str) -> String {
        let lowered = name.trim().to_lowercase();
        self.separators.replace_all(&lowered, "_").to_string()
    }
}

pub fn read_csv(path: &Path) -> Result<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?
        .finish()
        .with_context(|| format!("Failed to parse CSV file: {}", path.display()))
}
