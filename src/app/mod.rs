//! Application module
//!
//! Process-wide concerns of the `sqs` binary:
//! - Configuration derived from global flags
//! - Logging to the console and to the run transcript
//! - Fatal error reporting and exit codes

pub mod config;
pub mod error_handling;
pub mod logging;

pub use config::AppConfig;
pub use error_handling::handle_fatal_error;
pub use logging::init_logging;
