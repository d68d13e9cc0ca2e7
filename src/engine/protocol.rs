//! Wire format between [`ProcessEngine`](super::ProcessEngine) and the
//! engine executable: one JSON object per line in each direction.

use serde::{Deserialize, Serialize};

use super::types::{Experiment, ExperimentResult, WorkerEndpoint};
use super::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineRequest {
    Run {
        experiment: Experiment,
    },
    RunBatch {
        experiments: Vec<Experiment>,
        workers: Vec<WorkerEndpoint>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineResponse {
    Converged { result: ExperimentResult },
    Accepted { accepted: usize },
    Stopped,
    Error { message: String },
}

impl EngineRequest {
    pub fn op(&self) -> &'static str {
        match self {
            EngineRequest::Run { .. } => "run",
            EngineRequest::RunBatch { .. } => "run_batch",
            EngineRequest::Shutdown => "shutdown",
        }
    }

    pub fn encode(&self) -> Result<String, EngineError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| EngineError::Protocol(format!("cannot encode {}: {e}", self.op())))?;
        line.push('\n');
        Ok(line)
    }
}

impl EngineResponse {
    /// Parse one stdout line. `Ok(None)` means the line is not a protocol
    /// message (engines may print banners) and should only be logged.
    pub fn decode(line: &str) -> Result<Option<Self>, EngineError> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| EngineError::Protocol(format!("bad response {trimmed:?}: {e}")))
    }
}
