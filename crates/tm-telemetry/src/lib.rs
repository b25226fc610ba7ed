pub mod logging;
pub mod run_log;

pub use logging::{init_logging, init_logging_json};
pub use run_log::RunLogger;
