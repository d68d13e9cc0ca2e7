//! # sqs-cluster
//!
//! Orchestrates distributed convergence experiments: a local master
//! experiment runs until its statistics converge, then one calibrated slave
//! experiment per configured worker slot is dispatched across a cluster of
//! machines reached over ssh.
//!
//! ## Usage
//!
//! ```bash
//! sqs setup machines.cfg
//! sqs copy machines.cfg
//! sqs run machines.cfg [experiment.toml]
//! sqs kill machines.cfg
//! ```
//!
//! ## Modules
//!
//! - `app` - Logging, application configuration and fatal error handling
//! - `cli` - Argument parsing and command routing
//! - `cluster` - Machine registry, deployment, cleanup and worker launch
//! - `coordinator` - The two-phase master/slave run state machine
//! - `credentials` - Key generation and password-prompt negotiation for `setup`
//! - `engine` - Simulation engine contract and its process-backed client
//! - `experiment` - `experiment.toml` parsing and validation
//! - `subprocess` - Testable process execution, including ssh/scp/rsync
pub mod app;
pub mod cli;
pub mod cluster;
pub mod coordinator;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod subprocess;

pub use error::{Result, SqsError};
