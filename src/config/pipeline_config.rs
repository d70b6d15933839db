use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables with this prefix override file values,
/// e.g. `ETL__OUTPUTS__OUTPUT_DIR=/tmp/out`.
pub const ENV_PREFIX: &str = "ETL";

/// Top-level configuration handed to every pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    pub outputs: OutputConfig,
    pub logging: LogSinkConfig,
    pub transform: TransformConfig,
    pub extract: ExtractConfig,
}

/// Raw input files produced by extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub sales_path: PathBuf,
    pub trends_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    pub enriched_file_stem: String,
    pub aggregate_file_stem: String,
    pub formats: Vec<OutputFormat>,
}

/// Append-only JSON-lines files receiving one record per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub transform_log: PathBuf,
    pub extract_log: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Category values (matched case-insensitively) whose rows are removed.
    pub excluded_categories: Vec<String>,
    /// Trend columns used for the summary features and the per-product trend.
    pub trend_keywords: Vec<String>,
    pub iqr_multiplier: f64,
    /// Maximum allowed p99 / median ratio of gross revenue.
    pub distribution_ratio_limit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub sales_url: Option<String>,
    /// May contain `{start}` and `{end}` placeholders, filled with the sales date range.
    pub trends_url: Option<String>,
    pub geo: String,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            sales_path: PathBuf::from("data/raw/source1_coffee_shop_sales_raw.csv"),
            trends_path: PathBuf::from("data/raw/source2_pytrends_interest_over_time_raw.csv"),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/transformed"),
            enriched_file_stem: "etl_transformed_sales_enriched".to_string(),
            aggregate_file_stem: "mart_daily_category_sales".to_string(),
            formats: vec![OutputFormat::Csv],
        }
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            transform_log: PathBuf::from("logs/etl/transform_log.jsonl"),
            extract_log: PathBuf::from("logs/etl/extract_log.jsonl"),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            excluded_categories: vec![
                "branded".to_string(),
                "flavours".to_string(),
                "flavors".to_string(),
            ],
            trend_keywords: vec![
                "coffee".to_string(),
                "bakery".to_string(),
                "tea".to_string(),
                "chocolate".to_string(),
            ],
            iqr_multiplier: 1.5,
            distribution_ratio_limit: 50.0,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            sales_url: None,
            trends_url: None,
            geo: "US-NY".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file, without environment overrides.
    #[allow(dead_code)]
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config file: {}", path))?;

        let config: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse pipeline config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Layer the (optional) TOML file under `ETL__*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::new(path, ::config::FileFormat::Toml).required(false))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to assemble configuration from {}", path))?;

        let config: PipelineConfig = settings
            .try_deserialize()
            .with_context(|| format!("Invalid pipeline configuration in {}", path))?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.outputs.formats.is_empty() {
            return Err(anyhow::anyhow!("outputs.formats must name at least one format"));
        }

        if self.transform.iqr_multiplier < 0.0 {
            return Err(anyhow::anyhow!(
                "transform.iqr_multiplier must be non-negative, got {}",
                self.transform.iqr_multiplier
            ));
        }

        if self.transform.distribution_ratio_limit <= 0.0 {
            return Err(anyhow::anyhow!(
                "transform.distribution_ratio_limit must be positive, got {}",
                self.transform.distribution_ratio_limit
            ));
        }

        Ok(())
    }

    pub fn enriched_path(&self, format: OutputFormat) -> PathBuf {
        self.output_path(&self.outputs.enriched_file_stem, format)
    }

    pub fn aggregate_path(&self, format: OutputFormat) -> PathBuf {
        self.output_path(&self.outputs.aggregate_file_stem, format)
    }

    fn output_path(&self, stem: &str, format: OutputFormat) -> PathBuf {
        Path::new(&self.outputs.output_dir).join(format!("{}.{}", stem, format.extension()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transform.trend_keywords.len(), 4);
        assert_eq!(config.transform.iqr_multiplier, 1.5);
        assert_eq!(
            config.enriched_path(OutputFormat::Csv),
            PathBuf::from("data/transformed/etl_transformed_sales_enriched.csv")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [outputs]
            output_dir = "/tmp/etl-out"
            formats = ["csv", "parquet"]
            "#,
        )
        .unwrap();

        assert_eq!(config.outputs.output_dir, PathBuf::from("/tmp/etl-out"));
        assert_eq!(config.outputs.formats, vec![OutputFormat::Csv, OutputFormat::Parquet]);
        assert_eq!(config.outputs.aggregate_file_stem, "mart_daily_category_sales");
        assert_eq!(config.transform.excluded_categories.len(), 3);
    }

    #[test]
    fn test_bundled_config_parses() {
        let config = PipelineConfig::from_file("src/configs/pipeline.toml").unwrap();
        assert_eq!(config.outputs.formats, vec![OutputFormat::Csv, OutputFormat::Parquet]);
        assert!(config.extract.sales_url.is_some());
        assert_eq!(config.extract.geo, "US-NY");
    }

    #[test]
    fn test_rejects_empty_formats() {
        let mut config = PipelineConfig::default();
        config.outputs.formats.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.transform.trend_keywords, config.transform.trend_keywords);
        assert_eq!(parsed.logging.transform_log, config.logging.transform_log);
    }
}
