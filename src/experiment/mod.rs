//! Experiment configuration (`experiment.toml`)

pub mod config;

pub use config::{ExperimentConfig, DEFAULT_EXPERIMENT_CONFIG};
