use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cluster::{ClusterSettings, LaunchScriptBuilder, TimingSettings, WorkerSettings};
use crate::engine::{EngineConfig, Experiment, ExperimentStatSpec};
use crate::error::{Result, SqsError};

pub const DEFAULT_EXPERIMENT_CONFIG: &str = "experiment.toml";

fn default_seed() -> u64 {
    1
}

/// Parsed `experiment.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub engine: EngineConfig,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub stats: Vec<ExperimentStatSpec>,
    /// Passed to the engine untouched.
    #[serde(default)]
    pub topology: serde_json::Value,
    #[serde(skip)]
    origin: PathBuf,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SqsError::invalid_experiment(&origin, format!("cannot read file: {e}")))?;

        let mut config = Self::parse_str(&content, &origin)?;
        config.origin = path.to_path_buf();
        Ok(config)
    }

    pub fn parse_str(content: &str, origin: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SqsError::invalid_experiment(origin, e.to_string()))?;
        config.validate(origin)?;
        tracing::debug!(
            "Loaded experiment {:?} with {} stat spec(s) from {}",
            config.name,
            config.stats.len(),
            origin
        );
        Ok(config)
    }

    fn validate(&self, origin: &str) -> Result<()> {
        if self.stats.is_empty() {
            return Err(SqsError::invalid_experiment(
                origin,
                "at least one [[stats]] entry is required",
            ));
        }
        for spec in &self.stats {
            spec.validate()
                .map_err(|message| SqsError::invalid_experiment(origin, message))?;
        }
        if self.engine.command.trim().is_empty() {
            return Err(SqsError::invalid_experiment(
                origin,
                "[engine].command must not be empty",
            ));
        }
        if self.workers.binding_prefix.is_empty() {
            return Err(SqsError::invalid_experiment(
                origin,
                "[workers].binding_prefix must not be empty",
            ));
        }
        // Compile and check the worker template now rather than halfway through launch.
        LaunchScriptBuilder::new(&self.workers)?;
        Ok(())
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            timing: self.timing.clone(),
            workers: self.workers.clone(),
        }
    }

    pub fn master_experiment(&self) -> Experiment {
        Experiment::master(
            self.name.clone(),
            self.stats.clone(),
            self.topology.clone(),
            self.seed,
        )
    }
}
