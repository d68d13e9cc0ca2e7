//! Cluster-side knobs: settle delays, worker launch commands, stop script.
//!
//! These live in the `[timing]` and `[workers]` tables of the experiment
//! config. `kill` and `copy` read them from `experiment.toml` when present and
//! fall back to the defaults below otherwise.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SqsError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Pause after each detached launch so the remote shell actually starts.
    #[serde(with = "humantime_serde")]
    pub launch_settle: Duration,
    /// Pause after all launches before the master experiment connects.
    #[serde(with = "humantime_serde")]
    pub master_start_delay: Duration,
    /// Fixed wait after submitting the slave batch.
    #[serde(with = "humantime_serde")]
    pub slave_grace: Duration,
    /// Offset between consecutive cleanup starts.
    #[serde(with = "humantime_serde")]
    pub cleanup_stagger: Duration,
    #[serde(with = "humantime_serde")]
    pub cleanup_timeout: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            launch_settle: Duration::from_secs(1),
            master_start_delay: Duration::from_secs(3),
            slave_grace: Duration::from_secs(10),
            cleanup_stagger: Duration::from_secs(1),
            cleanup_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Lookup service started once per machine.
    pub registry_command: String,
    /// Directory under the machine workdir the lookup service runs in.
    pub registry_subdir: String,
    /// Tera template for one worker process. Variables: `workdir`,
    /// `binding`, `index`, `machine_index`, `host`, `user`.
    pub worker_command: String,
    pub binding_prefix: String,
    /// Process patterns the stop script kills (matched with `pkill -f`).
    pub kill_patterns: Vec<String>,
    /// Remote directory launch and stop scripts are staged in.
    pub staging_dir: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            registry_command: "rmiregistry".to_string(),
            registry_subdir: "bin".to_string(),
            worker_command: "java -Djava.rmi.server.codebase=file://{{ workdir }}/slave.jar \
                             -Djava.security.policy=slave.policy -jar slave.jar {{ binding }}"
                .to_string(),
            binding_prefix: "sim_".to_string(),
            kill_patterns: vec!["slave.jar".to_string(), "rmiregistry".to_string()],
            staging_dir: "/tmp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
}

impl ClusterSettings {
    /// Read `[timing]`/`[workers]` from an experiment config if it exists.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(
                "No experiment config at {}, using default cluster settings",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SqsError::invalid_experiment(path.display().to_string(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings =
            ClusterSettings::load_or_default(Path::new("/nonexistent/experiment.toml")).unwrap();
        assert_eq!(settings, ClusterSettings::default());
        assert_eq!(settings.timing.master_start_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_partial_tables_keep_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        std::fs::write(
            &path,
            r#"
name = "ignored here"

[timing]
launch_settle = "250ms"

[workers]
kill_patterns = ["worker.jar"]
"#,
        )
        .unwrap();

        let settings = ClusterSettings::load_or_default(&path).unwrap();
        assert_eq!(settings.timing.launch_settle, Duration::from_millis(250));
        assert_eq!(settings.timing.slave_grace, Duration::from_secs(10));
        assert_eq!(settings.workers.kill_patterns, vec!["worker.jar"]);
        assert_eq!(settings.workers.registry_command, "rmiregistry");
    }

    #[test]
    fn test_bad_duration_is_experiment_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        std::fs::write(&path, "[timing]\nslave_grace = \"soon\"\n").unwrap();

        let err = ClusterSettings::load_or_default(&path).unwrap_err();
        assert!(matches!(err, SqsError::InvalidExperiment { .. }));
    }
}
