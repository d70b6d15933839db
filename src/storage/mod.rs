pub mod local_store;
pub mod run_log;

pub use local_store::*;
pub use run_log::*;
