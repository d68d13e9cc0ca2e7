//! CLI command handlers
//!
//! - Argument parsing structures
//! - Routing of subcommands to the cluster, credential and coordinator layers

pub mod args;
pub mod router;

// Re-export the main CLI structures for convenience
pub use args::{Cli, Commands};
pub use router::execute_command;
