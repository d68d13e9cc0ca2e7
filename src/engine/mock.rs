use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::types::{BatchReceipt, Experiment, ExperimentResult, WorkerEndpoint};
use super::{EngineError, SimulationEngine};

#[derive(Default)]
struct Recorded {
    runs: Vec<Experiment>,
    batches: Vec<(Vec<Experiment>, Vec<WorkerEndpoint>)>,
    shutdowns: usize,
}

/// In-memory engine for tests. Clones share their recordings.
#[derive(Clone)]
pub struct MockEngine {
    master_result: Result<ExperimentResult, String>,
    batch_error: Option<String>,
    shutdown_error: Option<String>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockEngine {
    /// Engine whose master run converges to `result`.
    pub fn converging_to(result: ExperimentResult) -> Self {
        Self {
            master_result: Ok(result),
            batch_error: None,
            shutdown_error: None,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    pub fn failing_master(message: impl Into<String>) -> Self {
        Self {
            master_result: Err(message.into()),
            ..Self::converging_to(ExperimentResult::default())
        }
    }

    pub fn failing_batch(mut self, message: impl Into<String>) -> Self {
        self.batch_error = Some(message.into());
        self
    }

    pub fn failing_shutdown(mut self, message: impl Into<String>) -> Self {
        self.shutdown_error = Some(message.into());
        self
    }

    pub fn runs(&self) -> Vec<Experiment> {
        self.recorded.lock().unwrap().runs.clone()
    }

    pub fn batches(&self) -> Vec<(Vec<Experiment>, Vec<WorkerEndpoint>)> {
        self.recorded.lock().unwrap().batches.clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.recorded.lock().unwrap().shutdowns
    }
}

#[async_trait]
impl SimulationEngine for MockEngine {
    async fn run(&self, experiment: &Experiment) -> Result<ExperimentResult, EngineError> {
        self.recorded.lock().unwrap().runs.push(experiment.clone());
        self.master_result
            .clone()
            .map_err(|message| EngineError::Remote { message })
    }

    async fn run_batch(
        &self,
        experiments: &[Experiment],
        workers: &[WorkerEndpoint],
    ) -> Result<BatchReceipt, EngineError> {
        self.recorded
            .lock()
            .unwrap()
            .batches
            .push((experiments.to_vec(), workers.to_vec()));
        match &self.batch_error {
            Some(message) => Err(EngineError::Remote {
                message: message.clone(),
            }),
            None => Ok(BatchReceipt {
                accepted: experiments.len(),
            }),
        }
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.recorded.lock().unwrap().shutdowns += 1;
        match &self.shutdown_error {
            Some(message) => Err(EngineError::Remote {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}
