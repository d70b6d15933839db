use anyhow::{Context, Result};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{OutputFormat, PipelineConfig};

/// Writes the published tables under the configured output directory.
pub struct LocalStore {
    output_dir: PathBuf,
}

/// Files written for one run, grouped by table.
#[derive(Debug, Default)]
pub struct WrittenOutputs {
    pub enriched: Vec<PathBuf>,
    pub aggregate: Vec<PathBuf>,
}

impl LocalStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        LocalStore {
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.outputs.output_dir)
    }

    pub fn ensure_output_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create output directory {}", self.output_dir.display())
        })?;
        Ok(())
    }

    /// Both tables in every configured format. Nothing is written unless
    /// the caller already holds the finished tables.
    pub fn write_outputs(
        &self,
        config: &PipelineConfig,
        enriched: &mut DataFrame,
        aggregate: &mut DataFrame,
    ) -> Result<WrittenOutputs> {
        self.ensure_output_dir()?;

        let mut written = WrittenOutputs::default();
        for format in &config.outputs.formats {
            let path = config.enriched_path(*format);
            self.write_table(enriched, &path, *format)?;
            written.enriched.push(path);

            let path = config.aggregate_path(*format);
            self.write_table(aggregate, &path, *format)?;
            written.aggregate.push(path);
        }

        Ok(written)
    }

    pub fn write_table(&self, df: &mut DataFrame, path: &Path, format: OutputFormat) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let mut file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;

        match format {
            OutputFormat::Csv => {
                CsvWriter::new(&mut file)
                    .include_header(true)
                    .finish(df)
                    .with_context(|| format!("Failed to write CSV {}", path.display()))?;
            }
            OutputFormat::Parquet => {
                ParquetWriter::new(&mut file)
                    .finish(df)
                    .with_context(|| format!("Failed to write Parquet {}", path.display()))?;
            }
        }

        info!(
            "Wrote {} rows x {} cols to {}",
            df.height(),
            df.width(),
            path.display()
        );
        Ok(())
    }
}
