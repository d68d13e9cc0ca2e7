//! Logging configuration and initialization
//!
//! Two sinks: the console, filtered by `-v`, and the run transcript, which
//! always records at debug level and is appended to across runs.

use crate::app::config::AppConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{debug, trace};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const TRANSCRIPT_FILTER: &str = "debug";

/// Initialize tracing for the application. Returns an error only when the
/// transcript file cannot be opened.
pub fn init_logging(config: &AppConfig) -> std::io::Result<()> {
    let log_path = config.log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(config.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(config.verbose >= 3) // Show line numbers for -vvv
        .with_filter(EnvFilter::new(config.log_level()));

    let transcript = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_filter(EnvFilter::new(TRANSCRIPT_FILTER));

    // A subscriber may already be installed (tests, embedding); keep it.
    if tracing_subscriber::registry()
        .with(console)
        .with(transcript)
        .try_init()
        .is_err()
    {
        return Ok(());
    }

    debug!(
        "sqs {} started with verbosity level {}, transcript at {}",
        env!("CARGO_PKG_VERSION"),
        config.verbose,
        log_path.display()
    );
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
    Ok(())
}
