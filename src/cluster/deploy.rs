//! Simulation tree deployment
//!
//! Each machine's `<remote_dir>/<user>` is made an exact mirror of the local
//! simulation root. Machines are handled one at a time in registry order and
//! the first failure aborts the whole deployment.

use std::path::Path;
use std::time::{Duration, Instant};

use super::registry::MachineEntry;
use super::session::ClusterSession;
use crate::error::{Result, SqsError};
use crate::subprocess::{check_command_success, ProcessError, ProcessOutput, RemoteShell};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub host: String,
    pub remote_dir: String,
    pub duration: Duration,
}

pub async fn deploy(
    session: &ClusterSession,
    shell: &dyn RemoteShell,
    local_root: &Path,
) -> Result<Vec<DeployOutcome>> {
    if !local_root.is_dir() {
        return Err(SqsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("simulation root {} is not a directory", local_root.display()),
        )));
    }

    let registry = session.registry();
    registry.require_machines()?;

    let mut outcomes = Vec::with_capacity(registry.len());
    for machine in registry.iter() {
        outcomes.push(deploy_machine(shell, machine, local_root).await?);
    }

    tracing::info!(
        "Deployed {} to {} machine(s)",
        local_root.display(),
        outcomes.len()
    );
    Ok(outcomes)
}

async fn deploy_machine(
    shell: &dyn RemoteShell,
    machine: &MachineEntry,
    local_root: &Path,
) -> Result<DeployOutcome> {
    let started = Instant::now();
    let workdir = machine.workdir();

    let mkdir = format!("mkdir -p {}", shell_words::quote(&workdir));
    tracing::debug!("{}: {}", machine.host, mkdir);
    let result = shell.exec(machine, &mkdir, None).await;
    require_success(machine, &mkdir, result)?;

    let mirror = format!("rsync {} -> {}:{}", local_root.display(), machine.target(), workdir);
    tracing::debug!("{}: {}", machine.host, mirror);
    let result = shell.mirror(machine, local_root, &workdir).await;
    require_success(machine, &mirror, result)?;

    let duration = started.elapsed();
    tracing::info!("Deployed to {} in {:?}", machine.target(), duration);

    Ok(DeployOutcome {
        host: machine.host.clone(),
        remote_dir: workdir,
        duration,
    })
}

/// Map a remote command result onto [`SqsError::Deploy`].
pub(crate) fn require_success(
    machine: &MachineEntry,
    command: &str,
    result: std::result::Result<ProcessOutput, ProcessError>,
) -> Result<ProcessOutput> {
    let output = result.map_err(|e| SqsError::Deploy {
        host: machine.host.clone(),
        command: command.to_string(),
        exit_code: None,
        reason: e.to_string(),
    })?;

    if let Err(e) = check_command_success(&output) {
        let stderr = output.stderr.trim();
        return Err(SqsError::Deploy {
            host: machine.host.clone(),
            command: command.to_string(),
            exit_code: output.status.code(),
            reason: if stderr.is_empty() {
                e.to_string()
            } else {
                format!("{e}: {stderr}")
            },
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSettings, MachineRegistry};
    use crate::subprocess::SubprocessManager;

    fn session(machines: Vec<MachineEntry>) -> ClusterSession {
        ClusterSession::new(
            MachineRegistry::new("inline", machines),
            ClusterSettings::default(),
            "sqs.log",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_creates_workdir_then_mirrors() {
        let (manager, mut mock) = SubprocessManager::mock();
        mock.expect_command("ssh").returns_success().finish();
        mock.expect_command("rsync").returns_success().finish();

        let root = tempfile::tempdir().unwrap();
        let session = session(vec![
            MachineEntry::new("h1", "u1", "/d", 2),
            MachineEntry::new("h2", "u2", "/scratch", 1),
        ]);

        let outcomes = deploy(&session, &manager.ssh(), root.path()).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].remote_dir, "/scratch/u2");

        let history = mock.get_call_history();
        let programs: Vec<&str> = history.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(programs, vec!["ssh", "rsync", "ssh", "rsync"]);
        assert_eq!(history[0].args.last().unwrap(), "mkdir -p /d/u1");
        assert_eq!(history[3].args.last().unwrap(), "u2@h2:/scratch/u2/");
    }

    #[tokio::test]
    async fn test_deploy_stops_at_first_failed_machine() {
        let (manager, mut mock) = SubprocessManager::mock();
        mock.expect_command("ssh").returns_success().finish();
        mock.expect_command("rsync")
            .with_args(|args| args.iter().any(|a| a.starts_with("u1@h1:")))
            .returns_exit_code(23)
            .returns_stderr("rsync: connection unexpectedly closed")
            .finish();
        mock.expect_command("rsync").returns_success().finish();

        let root = tempfile::tempdir().unwrap();
        let session = session(vec![
            MachineEntry::new("h1", "u1", "/d", 2),
            MachineEntry::new("h2", "u2", "/d", 1),
        ]);

        let err = deploy(&session, &manager.ssh(), root.path())
            .await
            .unwrap_err();
        match err {
            SqsError::Deploy {
                host,
                exit_code,
                reason,
                ..
            } => {
                assert_eq!(host, "h1");
                assert_eq!(exit_code, Some(23));
                assert!(reason.contains("connection unexpectedly closed"));
            }
            other => panic!("expected Deploy error, got {other:?}"),
        }
        assert_eq!(mock.count_calls(|c| c.args.iter().any(|a| a.contains("h2"))), 0);
    }

    #[tokio::test]
    async fn test_deploy_requires_local_directory() {
        let (manager, _mock) = SubprocessManager::mock();
        let session = session(vec![MachineEntry::new("h1", "u1", "/d", 1)]);

        let err = deploy(&session, &manager.ssh(), Path::new("/nonexistent/sim"))
            .await
            .unwrap_err();
        assert!(matches!(err, SqsError::Io(_)));
    }
}
