use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use wreq::Client;
use wreq_util::Emulation;

use crate::config::PipelineConfig;
use crate::models::ExtractRunRecord;
use crate::processor::columns::DATE_CANDIDATES;
use crate::processor::datetime::{format_date, parse_date};
use crate::processor::{FrameExt, SourceLoader};
use crate::storage::RunLog;

pub const SALES_SOURCE: &str = "github_raw_csv_coffee_shop_sales";
pub const TRENDS_SOURCE: &str = "search_trends_interest_over_time";

/// Downloads the two raw CSV sources and records one extract entry per file.
pub struct HttpFetcher {
    client: Client,
    config: PipelineConfig,
}

impl HttpFetcher {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .emulation(Emulation::Firefox139)
            .build()?;

        Ok(HttpFetcher { client, config })
    }

    /// Sales first, then trends over the sales date range.
    pub async fn extract_all(&self) -> Result<Vec<ExtractRunRecord>> {
        let log = RunLog::new(&self.config.logging.extract_log);
        let mut records = Vec::with_capacity(2);

        let sales_url = self
            .config
            .extract
            .sales_url
            .as_deref()
            .ok_or_else(|| anyhow!("extract.sales_url is not configured"))?;
        let sales_path = &self.config.inputs.sales_path;

        let record = self
            .download_csv(SALES_SOURCE, sales_url, sales_path, BTreeMap::new())
            .await?;
        log.append(&record)?;
        records.push(record);

        let Some(template) = self.config.extract.trends_url.as_deref() else {
            warn!("extract.trends_url is not configured, keeping existing trends file");
            return Ok(records);
        };

        let (start, end) = sales_date_range(sales_path)?;
        let mut params = BTreeMap::new();
        params.insert("keywords".to_string(), self.config.transform.trend_keywords.join(","));
        params.insert("geo".to_string(), self.config.extract.geo.clone());
        params.insert("timeframe".to_string(), format!("{} {}", start, end));

        let url = fill_template(template, &start, &end, &params);
        let record = self
            .download_csv(TRENDS_SOURCE, &url, &self.config.inputs.trends_path, params)
            .await?;
        log.append(&record)?;
        records.push(record);

        Ok(records)
    }

    pub async fn download_csv(
        &self,
        source_name: &str,
        url: &str,
        dest: &Path,
        mut params: BTreeMap<String, String>,
    ) -> Result<ExtractRunRecord> {
        let started = Instant::now();
        info!("Fetching {} from {}", source_name, url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error {} while fetching {}", response.status(), url));
        }
        let body = response.bytes().await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::write(dest, &body)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;

        let table = SourceLoader::new()?.load_table(dest)?;
        params.insert("url".to_string(), url.to_string());

        let record = ExtractRunRecord {
            stage: "extract".to_string(),
            source_name: source_name.to_string(),
            params,
            output_file: dest.display().to_string(),
            rows: table.height(),
            cols: table.width(),
            size_bytes: body.len() as u64,
            exec_seconds: started.elapsed().as_secs_f64(),
            timestamp: Utc::now().to_rfc3339(),
        };

        info!(
            "Saved {} rows x {} cols ({} bytes) to {}",
            record.rows,
            record.cols,
            record.size_bytes,
            record.output_file
        );
        Ok(record)
    }
}

/// Earliest and latest parseable transaction date of a raw sales file.
pub fn sales_date_range(sales_path: &Path) -> Result<(String, String)> {
    let sales = SourceLoader::new()?.load_table(sales_path)?;
    let date_col = sales
        .first_present(DATE_CANDIDATES)
        .ok_or_else(|| anyhow!("{} has no transaction date column", sales_path.display()))?;

    let dates: Vec<NaiveDate> = sales
        .text_values(date_col)?
        .iter()
        .filter_map(|v| v.as_deref().and_then(parse_date))
        .collect();

    match (dates.iter().min(), dates.iter().max()) {
        (Some(start), Some(end)) => Ok((format_date(start), format_date(end))),
        _ => Err(anyhow!("{} has no parseable transaction dates", sales_path.display())),
    }
}

/// Replace `{start}`, `{end}` and any `{param}` placeholder in a URL template.
pub fn fill_template(
    template: &str,
    start: &str,
    end: &str,
    params: &BTreeMap<String, String>,
) -> String {
    let mut url = template.replace("{start}", start).replace("{end}", end);
    for (key, value) in params {
        url = url.replace(&format!("{{{}}}", key), value);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uuid::Uuid;

    #[test]
    fn test_fill_template() {
        let mut params = BTreeMap::new();
        params.insert("geo".to_string(), "US-NY".to_string());
        params.insert("keywords".to_string(), "coffee,tea".to_string());

        let url = fill_template(
            "https://trends.example/csv?from={start}&to={end}&geo={geo}&q={keywords}",
            "2023-01-01",
            "2023-06-30",
            &params,
        );

        assert_eq!(
            url,
            "https://trends.example/csv?from=2023-01-01&to=2023-06-30&geo=US-NY&q=coffee,tea"
        );
    }

    #[test]
    fn test_sales_date_range() {
        let dir = std::env::temp_dir().join(format!("etl-fetch-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sales.csv");
        fs::write(
            &path,
            "Transaction Date,unit_price\n1/15/2023,3.0\nnot a date,1.0\n6/30/2023,2.5\n1/1/2023,1.0\n",
        )
        .unwrap();

        let (start, end) = sales_date_range(&path).unwrap();
        assert_eq!(start, "2023-01-01");
        assert_eq!(end, "2023-06-30");

        fs::remove_dir_all(dir).ok();
    }
}
