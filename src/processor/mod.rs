pub mod aggregator;
pub mod category_mapper;
pub mod columns;
pub mod datetime;
pub mod deduplicator;
pub mod dq_validator;
pub mod encoder;
pub mod feature_builder;
pub mod final_cleanup;
pub mod frame_ext;
pub mod loader;
pub mod outlier_normalizer;
pub mod quality_fixer;
pub mod stats;
pub mod trend_joiner;

pub use aggregator::DailyCategoryAggregator;
pub use category_mapper::CategoryMapper;
pub use deduplicator::Deduplicator;
pub use dq_validator::DqValidator;
pub use encoder::{EncodingReport, OneHotEncoder};
pub use feature_builder::FeatureBuilder;
pub use final_cleanup::FinalCleanup;
pub use frame_ext::{ColumnContract, FrameExt};
pub use loader::SourceLoader;
pub use outlier_normalizer::{OutlierNormalizer, OutlierReport};
pub use quality_fixer::QualityFixer;
pub use trend_joiner::{JoinReport, TrendJoiner};
