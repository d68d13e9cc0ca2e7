//! Simulation engine contract
//!
//! The orchestrator never computes statistics itself. It hands a master
//! experiment to an engine, waits for convergence, and then submits one
//! calibrated slave experiment per worker slot. [`SimulationEngine`] is that
//! boundary; [`ProcessEngine`] talks to an engine executable and
//! [`MockEngine`] stands in for it in tests.

pub mod mock;
pub mod process;
pub mod protocol;
pub mod types;

pub use mock::MockEngine;
pub use process::{EngineConfig, ProcessEngine};
pub use types::{
    BatchReceipt, CalibrationValues, Experiment, ExperimentResult, ExperimentRole,
    ExperimentStatSpec, QuantileEstimate, StatCalibration, StatName, StatSummary, WorkerEndpoint,
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to start engine `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine protocol violation: {0}")]
    Protocol(String),

    #[error("engine reported an error: {message}")]
    Remote { message: String },

    #[error("engine closed its connection")]
    Closed,

    #[error("converged result is missing statistic {0}")]
    MissingStat(StatName),
}

#[async_trait]
pub trait SimulationEngine: Send + Sync {
    /// Run an experiment locally and block until it converges.
    async fn run(&self, experiment: &Experiment) -> Result<ExperimentResult, EngineError>;

    /// Submit experiments to remote workers. Returns once the engine has
    /// accepted the batch, not when the experiments finish.
    async fn run_batch(
        &self,
        experiments: &[Experiment],
        workers: &[WorkerEndpoint],
    ) -> Result<BatchReceipt, EngineError>;

    /// Release the engine. Safe to call more than once.
    async fn shutdown(&self) -> Result<(), EngineError>;
}
