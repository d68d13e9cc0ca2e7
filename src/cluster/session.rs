//! Per-invocation orchestration context
//!
//! A `ClusterSession` is created when a command starts and handed by
//! reference to every component. It owns the parsed registry, the cluster
//! settings, the local staging directory for generated scripts, the cached
//! setup password and the path of the run transcript. Nothing in it outlives
//! the process.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::registry::MachineRegistry;
use super::settings::ClusterSettings;
use crate::error::Result;

pub struct ClusterSession {
    registry: MachineRegistry,
    settings: ClusterSettings,
    staging: TempDir,
    generated: Vec<PathBuf>,
    password: Option<String>,
    log_path: PathBuf,
    started_at: DateTime<Local>,
    torn_down: bool,
}

impl ClusterSession {
    pub fn new(
        registry: MachineRegistry,
        settings: ClusterSettings,
        log_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let staging = tempfile::Builder::new()
            .prefix("sqs-session-")
            .tempdir()?;
        let started_at = Local::now();

        tracing::debug!(
            "Session started at {} with {} machine(s), staging in {}",
            started_at.to_rfc3339(),
            registry.len(),
            staging.path().display()
        );

        Ok(Self {
            registry,
            settings,
            staging,
            generated: Vec::new(),
            password: None,
            log_path: log_path.into(),
            started_at,
            torn_down: false,
        })
    }

    pub fn registry(&self) -> &MachineRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Write a generated artifact into the staging directory and remember it
    /// for teardown.
    pub fn write_artifact(&mut self, file_name: &str, content: &str) -> Result<PathBuf> {
        let path = self.staging.path().join(file_name);
        std::fs::write(&path, content)?;
        tracing::debug!("Generated {}", path.display());
        self.generated.push(path.clone());
        Ok(path)
    }

    pub fn generated_artifacts(&self) -> &[PathBuf] {
        &self.generated
    }

    pub fn cache_password(&mut self, password: String) {
        self.password = Some(password);
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Remove generated artifacts. Safe to call more than once.
    pub fn teardown(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;
        self.password = None;

        let mut removed = 0;
        for path in self.generated.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
            }
        }

        let elapsed = Local::now().signed_duration_since(self.started_at);
        tracing::debug!(
            "Session teardown after {}s removed {} generated file(s), transcript kept at {}",
            elapsed.num_seconds(),
            removed,
            self.log_path.display()
        );
        removed
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for ClusterSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MachineEntry;

    fn session() -> ClusterSession {
        let registry = MachineRegistry::new("inline", vec![MachineEntry::new("h1", "u1", "/d", 2)]);
        ClusterSession::new(registry, ClusterSettings::default(), "sqs.log").unwrap()
    }

    #[test]
    fn test_teardown_removes_generated_scripts() {
        let mut session = session();
        let a = session.write_artifact("slave_0.sh", "#!/bin/bash\n").unwrap();
        let b = session.write_artifact("cleanup_0.sh", "#!/bin/bash\n").unwrap();
        assert!(a.exists() && b.exists());
        assert_eq!(session.generated_artifacts().len(), 2);

        assert_eq!(session.teardown(), 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(session.is_torn_down());
        assert_eq!(session.teardown(), 0);
    }

    #[test]
    fn test_teardown_forgets_cached_password() {
        let mut session = session();
        session.cache_password("hunter2".into());
        assert_eq!(session.password(), Some("hunter2"));
        session.teardown();
        assert_eq!(session.password(), None);
    }

    #[test]
    fn test_drop_cleans_staging_directory() {
        let staging;
        {
            let mut session = session();
            session.write_artifact("slave_0.sh", "x").unwrap();
            staging = session.staging_dir().to_path_buf();
            assert!(staging.exists());
        }
        assert!(!staging.exists());
    }
}
