use serde::{Deserialize, Serialize};
use std::fmt;

use super::EngineError;

/// Statistics the engine knows how to track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatName {
    IdlePeriodTime,
    SojournTime,
    TotalCapping,
    FullSystemIdleFraction,
    BusyPeriodTime,
    GeneratedArrivalTime,
    GeneratedServiceTime,
    WaitTime,
    ServerLevelCap,
}

impl StatName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatName::IdlePeriodTime => "IDLE_PERIOD_TIME",
            StatName::SojournTime => "SOJOURN_TIME",
            StatName::TotalCapping => "TOTAL_CAPPING",
            StatName::FullSystemIdleFraction => "FULL_SYSTEM_IDLE_FRACTION",
            StatName::BusyPeriodTime => "BUSY_PERIOD_TIME",
            StatName::GeneratedArrivalTime => "GENERATED_ARRIVAL_TIME",
            StatName::GeneratedServiceTime => "GENERATED_SERVICE_TIME",
            StatName::WaitTime => "WAIT_TIME",
            StatName::ServerLevelCap => "SERVER_LEVEL_CAP",
        }
    }
}

impl fmt::Display for StatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convergence target for one statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatSpec {
    #[serde(rename = "name")]
    pub stat: StatName,
    pub mean_precision: f64,
    pub quantile: f64,
    pub quantile_precision: f64,
    #[serde(default)]
    pub warmup_samples: u64,
}

impl ExperimentStatSpec {
    /// Check that every fraction lies strictly between 0 and 1.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("mean_precision", self.mean_precision),
            ("quantile", self.quantile),
            ("quantile_precision", self.quantile_precision),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(format!(
                    "{}: {field} must be between 0 and 1 (exclusive), got {value}",
                    self.stat
                ));
            }
        }
        Ok(())
    }
}

/// Histogram boundaries for one statistic, taken from a converged master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatCalibration {
    pub stat: StatName,
    pub boundaries: Vec<f64>,
}

/// Calibration handed to every slave, one entry per stat spec in spec order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationValues(Vec<StatCalibration>);

impl CalibrationValues {
    pub fn new(entries: Vec<StatCalibration>) -> Self {
        Self(entries)
    }

    /// Pull the boundaries for each spec, in spec order, out of a master
    /// result. A stat the result does not carry is an engine failure.
    pub fn extract(
        specs: &[ExperimentStatSpec],
        result: &ExperimentResult,
    ) -> Result<Self, EngineError> {
        specs
            .iter()
            .map(|spec| {
                result
                    .stat(spec.stat)
                    .map(|summary| StatCalibration {
                        stat: spec.stat,
                        boundaries: summary.histogram_boundaries.clone(),
                    })
                    .ok_or(EngineError::MissingStat(spec.stat))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn entries(&self) -> &[StatCalibration] {
        &self.0
    }

    pub fn get(&self, stat: StatName) -> Option<&[f64]> {
        self.0
            .iter()
            .find(|entry| entry.stat == stat)
            .map(|entry| entry.boundaries.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExperimentRole {
    Master,
    Slave { index: usize },
}

/// One unit of work for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub role: ExperimentRole,
    pub stat_specs: Vec<ExperimentStatSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationValues>,
    #[serde(default)]
    pub topology: serde_json::Value,
    pub seed: u64,
}

impl Experiment {
    pub fn master(
        name: impl Into<String>,
        stat_specs: Vec<ExperimentStatSpec>,
        topology: serde_json::Value,
        seed: u64,
    ) -> Self {
        Self {
            name: name.into(),
            role: ExperimentRole::Master,
            stat_specs,
            calibration: None,
            topology,
            seed,
        }
    }

    /// Derive slave `index` from the master. Slaves share the master's specs
    /// and topology but draw from their own seed.
    pub fn slave(master: &Experiment, calibration: &CalibrationValues, index: usize) -> Self {
        Self {
            name: format!("{} (slave {})", master.name, index),
            role: ExperimentRole::Slave { index },
            stat_specs: master.stat_specs.clone(),
            calibration: Some(calibration.clone()),
            topology: master.topology.clone(),
            seed: master.seed.wrapping_add(1).wrapping_add(index as u64),
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self.role, ExperimentRole::Master)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantileEstimate {
    pub p: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    pub stat: StatName,
    pub mean: f64,
    #[serde(default)]
    pub quantiles: Vec<QuantileEstimate>,
    #[serde(default)]
    pub histogram_boundaries: Vec<f64>,
    #[serde(default)]
    pub converged: bool,
}

impl StatSummary {
    pub fn quantile(&self, p: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|q| (q.p - p).abs() < 1e-9)
            .map(|q| q.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub stats: Vec<StatSummary>,
}

impl ExperimentResult {
    pub fn stat(&self, name: StatName) -> Option<&StatSummary> {
        self.stats.iter().find(|s| s.stat == name)
    }
}

/// Where the engine finds one remote worker: the machine plus the name the
/// worker is bound under in that machine's lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub host: String,
    pub binding: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub accepted: usize,
}
