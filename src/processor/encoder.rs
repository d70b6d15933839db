use anyhow::Result;
use polars::prelude::*;
use std::collections::BTreeSet;
use tracing::info;

use super::FrameExt;
use super::columns::ENCODE_CANDIDATES;

pub struct EncodingReport {
    pub source_column: Option<String>,
    pub indicator_columns: Vec<String>,
}

/// One-hot encodes the first available categorical column.
pub struct OneHotEncoder;

impl OneHotEncoder {
    pub fn encode(&self, df: &mut DataFrame) -> Result<EncodingReport> {
        let Some(source) = df.first_present(ENCODE_CANDIDATES) else {
            info!("No categorical column to encode");
            return Ok(EncodingReport {
                source_column: None,
                indicator_columns: Vec::new(),
            });
        };

        let values = df.text_values(source)?;
        let levels: BTreeSet<&str> = values.iter().flatten().map(|s| s.as_str()).collect();

        let mut indicator_columns = Vec::with_capacity(levels.len());
        for level in &levels {
            let name = format!("{}_{}", source, level);
            let flags: Vec<bool> = values.iter().map(|v| v.as_deref() == Some(*level)).collect();
            df.put_column(Series::new(name.as_str().into(), flags))?;
            indicator_columns.push(name);
        }

        df.drop_in_place(source)?;
        info!(
            "One-hot encoded '{}' into {} indicator columns",
            source,
            indicator_columns.len()
        );

        Ok(EncodingReport {
            source_column: Some(source.to_string()),
            indicator_columns,
        })
    }
}
