pub mod transform_pipeline;

pub use transform_pipeline::*;
