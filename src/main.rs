use anyhow::{Context, Result};
use std::env;
use tracing::{error, info, warn};

mod config;
mod fetcher;
mod models;
mod pipeline;
mod processor;
mod storage;

use crate::config::PipelineConfig;
use crate::fetcher::HttpFetcher;
use crate::pipeline::TransformPipeline;

const DEFAULT_CONFIG: &str = "src/configs/pipeline.toml";

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load environment variables before the config layer reads ETL__* overrides
    dotenv::dotenv().ok();

    if let Err(e) = run().await {
        error!("❌ Pipeline failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config_path = config_path(&args);
    let extract = args.iter().any(|arg| arg == "--extract" || arg == "-e");

    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("Failed to load pipeline configuration from {}", config_path))?;

    if args.iter().any(|arg| arg == "--print-config") {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        "🚀 Starting sales + trends ETL (sales: {}, trends: {})",
        config.inputs.sales_path.display(),
        config.inputs.trends_path.display()
    );

    if extract {
        info!("\n=== Extract ===");
        let fetcher = HttpFetcher::new(config.clone())?;
        let records = fetcher.extract_all().await?;
        for record in &records {
            info!(
                "✅ Extracted {}: {} rows -> {}",
                record.source_name, record.rows, record.output_file
            );
        }
    }

    info!("\n=== Transform ===");
    let pipeline = TransformPipeline::new(config)?;
    let record = tokio::task::spawn_blocking(move || pipeline.run())
        .await
        .context("Transform task panicked")??;

    info!("\n=== Transform Summary ===");
    info!("📊 Enriched rows: {} ({} columns) -> {}", record.rows, record.cols, record.output_file);
    info!("📊 Daily category rows: {} -> {}", record.aggregate_rows, record.aggregate_file);
    info!(
        "🔑 Key '{}' (synthetic: {}), {} duplicates removed",
        record.pk_used, record.pk_synthetic, record.dup_removed
    );

    let repaired: Vec<&str> = record
        .dq_rules
        .iter()
        .filter(|o| !o.ok)
        .map(|o| o.rule.as_str())
        .collect();
    if repaired.is_empty() {
        info!("✅ All data quality rules passed on the first pass");
    } else {
        warn!("⚠️ Data quality repairs applied: {:?}", repaired);
    }

    if record.dq_verification.iter().all(|o| o.ok) {
        info!("🎉 ETL completed in {:.2}s", record.exec_seconds);
    } else {
        warn!("⚠️ Verification pass still reports failing rules, see {}", record.output_file);
    }

    Ok(())
}

fn config_path(args: &[String]) -> String {
    args.iter()
        .position(|arg| arg == "--config" || arg == "-c")
        .and_then(|idx| args.get(idx + 1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
}
