use anyhow::Result;
use chrono::Utc;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::models::TransformRunRecord;
use crate::processor::{
    CategoryMapper, DailyCategoryAggregator, Deduplicator, DqValidator, FeatureBuilder,
    FinalCleanup, FrameExt, OneHotEncoder, OutlierNormalizer, QualityFixer, SourceLoader,
    TrendJoiner,
};
use crate::storage::{LocalStore, RunLog};

/// Result of a transform run before anything is published.
pub struct TransformOutput {
    pub enriched: DataFrame,
    pub aggregate: DataFrame,
    pub record: TransformRunRecord,
}

/// Runs every transform stage in order over the two raw inputs.
pub struct TransformPipeline {
    config: PipelineConfig,
    loader: SourceLoader,
    fixer: QualityFixer,
    outliers: OutlierNormalizer,
    features: FeatureBuilder,
    mapper: CategoryMapper,
    validator: DqValidator,
}

impl TransformPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let transform = &config.transform;

        Ok(TransformPipeline {
            loader: SourceLoader::new()?,
            fixer: QualityFixer::new(transform),
            outliers: OutlierNormalizer::new(transform.iqr_multiplier),
            features: FeatureBuilder::new(&transform.trend_keywords),
            mapper: CategoryMapper::new()?,
            validator: DqValidator::new(transform.distribution_ratio_limit),
            config,
        })
    }

    /// Transform, then publish both tables and append the run record.
    /// Nothing is written if any stage fails.
    pub fn run(&self) -> Result<TransformRunRecord> {
        let started = Instant::now();
        let mut output = self.transform()?;

        let written = LocalStore::from_config(&self.config).write_outputs(
            &self.config,
            &mut output.enriched,
            &mut output.aggregate,
        )?;
        info!(
            "Published {} enriched and {} aggregate files",
            written.enriched.len(),
            written.aggregate.len()
        );

        output.record.exec_seconds = started.elapsed().as_secs_f64();
        let run_log = RunLog::new(&self.config.logging.transform_log);
        run_log.append(&output.record)?;
        info!("Recorded run {} in {}", output.record.run_id, run_log.path().display());

        Ok(output.record)
    }

    pub fn transform(&self) -> Result<TransformOutput> {
        let started = Instant::now();
        let inputs = &self.config.inputs;
        let keywords = &self.config.transform.trend_keywords;

        info!("📥 Loading raw sources");
        let (sales, mut trends) = self
            .loader
            .load_sources(&inputs.sales_path, &inputs.trends_path)?;

        let (mut sales, pk, dup_removed) = Deduplicator.deduplicate(sales)?;

        info!("🧹 Pre-join cleaning");
        self.fixer.fill_missing(&mut sales)?;
        self.fixer.standardize_datetime(&mut sales)?;
        let (mut sales, excluded_category_rows) = self.fixer.exclude_categories(&sales)?;

        let outliers = self.outliers.apply(&mut sales)?;
        let encoding = OneHotEncoder.encode(&mut sales)?;

        info!("🔗 Joining daily trends");
        TrendJoiner.prepare_trends(&mut trends)?;
        let daily = TrendJoiner.aggregate_daily(&trends)?;
        let join = TrendJoiner.join(&mut sales, &daily)?;
        if join.joined && join.matched_rows == 0 {
            warn!("No transaction date matched the trends series, trend columns are empty");
        }
        let mut merged = sales;

        self.features.build(&mut merged)?;

        info!("🏷️ Mapping product categories");
        let mut raw = self.loader.load_table(&inputs.sales_path)?;
        Deduplicator.assign_key(&mut raw, &pk)?;
        self.mapper.attach(&mut merged, &raw, &pk)?;
        let (mut merged, dropped_unmapped_products) = self.mapper.drop_unmapped(&merged)?;
        self.mapper.add_trend_for_product(&mut merged, keywords)?;

        info!("✅ Validating data quality");
        let (merged, dq_rules) = self.validator.validate_and_repair(merged, &pk.column)?;
        let (merged, dq_verification) = self.validator.verify(merged, &pk.column)?;

        let (merged, final_cleanup_dropped) = FinalCleanup.apply(&merged)?;
        let (enriched, exclusion_recheck_removed) = self.fixer.exclude_categories(&merged)?;
        if exclusion_recheck_removed > 0 {
            warn!(
                "Exclusion recheck removed {} rows that survived the first pass",
                exclusion_recheck_removed
            );
        }

        let trend_nan_rate = trend_nan_rate(&enriched, &join.trend_columns, keywords)?;

        info!("📊 Building daily category aggregate");
        let aggregate = DailyCategoryAggregator.aggregate(&enriched)?;

        let format = self.config.outputs.formats.first().copied().unwrap_or_default();
        let record = TransformRunRecord {
            stage: "transform".to_string(),
            run_id: Uuid::new_v4().to_string(),
            input_files: vec![
                inputs.sales_path.display().to_string(),
                inputs.trends_path.display().to_string(),
            ],
            output_file: self.config.enriched_path(format).display().to_string(),
            aggregate_file: self.config.aggregate_path(format).display().to_string(),
            rows: enriched.height(),
            cols: enriched.width(),
            pk_used: pk.column.clone(),
            pk_synthetic: pk.synthetic,
            dup_removed,
            excluded_category_rows,
            exclusion_recheck_removed,
            outlier_method: format!(
                "IQR clipping ({}*IQR)",
                self.config.transform.iqr_multiplier
            ),
            outlier_cols_used: outliers.bounds,
            normalized_cols: outliers
                .normalized
                .iter()
                .map(|c| format!("{}_minmax", c))
                .collect(),
            encoded_col_original: encoding.source_column,
            encoded_columns: encoding.indicator_columns,
            trend_nan_rate,
            dq_rules,
            dq_verification,
            dropped_unmapped_products,
            final_cleanup_dropped,
            aggregate_rows: aggregate.height(),
            exec_seconds: started.elapsed().as_secs_f64(),
            timestamp: Utc::now().to_rfc3339(),
        };

        info!(
            "Transform finished: {} rows x {} cols, {} aggregate rows",
            record.rows, record.cols, record.aggregate_rows
        );

        Ok(TransformOutput {
            enriched,
            aggregate,
            record,
        })
    }
}

/// Share of missing values per keyword trend column that came from the join.
fn trend_nan_rate(
    df: &DataFrame,
    joined: &[String],
    keywords: &[String],
) -> Result<BTreeMap<String, f64>> {
    let mut rates = BTreeMap::new();
    if df.height() == 0 {
        return Ok(rates);
    }

    for keyword in keywords.iter().filter(|k| joined.contains(k)) {
        let missing = df
            .f64_values(keyword)?
            .iter()
            .filter(|v| v.is_none())
            .count();
        rates.insert(keyword.clone(), missing as f64 / df.height() as f64);
    }

    Ok(rates)
}
