//! Error handling utilities
//!
//! Centralized fatal error reporting for the binary.

use std::path::Path;
use tracing::error;

/// Print a one-line cause and where the full transcript is, then exit.
///
/// - For `SqsError`: the error's category and message, exit code from the error
/// - For other errors: the message, exit code 1
///
/// With `verbose >= 1` the full error chain is printed as well. `transcript`
/// is `None` when the log file could not be opened.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8, transcript: Option<&Path>) -> ! {
    use crate::error::SqsError;

    error!("Fatal error: {:#}", error);

    let exit_code = if let Some(sqs_err) = error.downcast_ref::<SqsError>() {
        eprintln!("Error ({}): {}", sqs_err.category(), sqs_err);
        sqs_err.exit_code()
    } else {
        eprintln!("Error: {error}");
        1
    };

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    if let Some(path) = transcript {
        eprintln!("See {} for the full transcript", path.display());
    }
    std::process::exit(exit_code)
}
