use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the row-identity key of the transaction table was established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub column: String,
    pub synthetic: bool,
    /// Columns hashed into a synthetic key; empty for a natural key.
    pub source_columns: Vec<String>,
}

/// Outcome of one data-quality rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DqRuleOutcome {
    pub rule: String,
    pub target: String,
    pub ok: bool,
    /// Human readable summary of the repair applied when `ok` is false.
    pub repair: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierBounds {
    pub column: String,
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
}

/// One line of the transform log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRunRecord {
    pub stage: String,
    pub run_id: String,
    pub input_files: Vec<String>,
    pub output_file: String,
    pub aggregate_file: String,
    pub rows: usize,
    pub cols: usize,
    pub pk_used: String,
    pub pk_synthetic: bool,
    pub dup_removed: usize,
    pub excluded_category_rows: usize,
    pub exclusion_recheck_removed: usize,
    pub outlier_method: String,
    pub outlier_cols_used: Vec<OutlierBounds>,
    pub normalized_cols: Vec<String>,
    pub encoded_col_original: Option<String>,
    pub encoded_columns: Vec<String>,
    pub trend_nan_rate: BTreeMap<String, f64>,
    pub dq_rules: Vec<DqRuleOutcome>,
    pub dq_verification: Vec<DqRuleOutcome>,
    pub dropped_unmapped_products: usize,
    pub final_cleanup_dropped: usize,
    pub aggregate_rows: usize,
    pub exec_seconds: f64,
    pub timestamp: String,
}

/// One line of the extract log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRunRecord {
    pub stage: String,
    pub source_name: String,
    pub params: BTreeMap<String, String>,
    pub output_file: String,
    pub rows: usize,
    pub cols: usize,
    pub size_bytes: u64,
    pub exec_seconds: f64,
    pub timestamp: String,
}
