//! Best-effort stop of stale workers on every machine.
//!
//! A small stop script is pushed to each machine and executed there. Runs
//! start `cleanup_stagger` apart, proceed concurrently and are all joined
//! before the caller continues. Nothing here aborts a run: failures end up
//! in the [`CleanupReport`] and the log.

use futures::future::join_all;

use super::registry::MachineEntry;
use super::session::ClusterSession;
use super::settings::WorkerSettings;
use crate::error::SqsError;
use crate::subprocess::{check_command_success, ProcessError, ProcessOutput, RemoteShell};

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub attempted: usize,
    pub failures: Vec<SqsError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted.saturating_sub(self.failures.len())
    }
}

/// Stop script for one machine: kill the user's processes matching each
/// configured pattern, ignoring "nothing matched".
pub fn render_stop_script(machine: &MachineEntry, workers: &WorkerSettings) -> String {
    let mut script = String::from("#!/bin/bash\n\n");
    for pattern in &workers.kill_patterns {
        script.push_str(&format!(
            "pkill -u {} -f {} || true\n",
            shell_words::quote(&machine.user),
            shell_words::quote(pattern)
        ));
    }
    script
}

pub fn remote_stop_script_name(machine: &MachineEntry) -> String {
    format!("cleanup_{}.sh", machine.user)
}

pub async fn cleanup(session: &mut ClusterSession, shell: &dyn RemoteShell) -> CleanupReport {
    let workers = session.settings().workers.clone();
    let timing = session.settings().timing.clone();
    let machines = session.registry().machines().to_vec();
    let staging = workers.staging_dir.trim_end_matches('/').to_string();

    let mut report = CleanupReport {
        attempted: machines.len(),
        failures: Vec::new(),
    };

    // Stage and push every stop script first.
    let mut ready = Vec::with_capacity(machines.len());
    for (index, machine) in machines.iter().enumerate() {
        let script = render_stop_script(machine, &workers);
        let local = match session.write_artifact(&format!("cleanup_{index}.sh"), &script) {
            Ok(path) => path,
            Err(e) => {
                report.failures.push(cleanup_error(machine, e.to_string()));
                continue;
            }
        };

        let remote = format!("{}/{}", staging, remote_stop_script_name(machine));
        match checked(shell.push(machine, &local, &remote).await) {
            Ok(_) => ready.push(machine.clone()),
            Err(message) => {
                report
                    .failures
                    .push(cleanup_error(machine, format!("copying stop script: {message}")))
            }
        }
    }

    let runs = ready.iter().enumerate().map(|(position, machine)| {
        let command = format!(
            "cd {} && sh {}",
            shell_words::quote(&staging),
            remote_stop_script_name(machine)
        );
        let delay = timing.cleanup_stagger * position as u32;
        let timeout = timing.cleanup_timeout;

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            tracing::debug!("Stopping stale workers on {}", machine.target());
            let result = checked(shell.exec(machine, &command, Some(timeout)).await);
            (machine, result)
        }
    });

    for (machine, result) in join_all(runs).await {
        if let Err(message) = result {
            report.failures.push(cleanup_error(machine, message));
        }
    }

    for failure in &report.failures {
        tracing::warn!("{}", failure);
    }
    tracing::info!(
        "Cleanup finished on {}/{} machine(s)",
        report.succeeded(),
        report.attempted
    );

    report
}

fn checked(result: Result<ProcessOutput, ProcessError>) -> Result<ProcessOutput, String> {
    let output = result.map_err(|e| e.to_string())?;
    match check_command_success(&output) {
        Ok(()) => Ok(output),
        Err(e) if output.stderr.trim().is_empty() => Err(e.to_string()),
        Err(e) => Err(format!("{e}: {}", output.stderr.trim())),
    }
}

fn cleanup_error(machine: &MachineEntry, message: String) -> SqsError {
    SqsError::Cleanup {
        host: machine.host.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSettings, MachineRegistry};
    use crate::subprocess::SubprocessManager;

    fn session() -> ClusterSession {
        ClusterSession::new(
            MachineRegistry::new(
                "inline",
                vec![
                    MachineEntry::new("h1", "u1", "/d", 2),
                    MachineEntry::new("h2", "u2", "/d", 3),
                ],
            ),
            ClusterSettings::default(),
            "sqs.log",
        )
        .unwrap()
    }

    #[test]
    fn test_stop_script_kills_each_pattern_for_user() {
        let machine = MachineEntry::new("h1", "u1", "/d", 2);
        let script = render_stop_script(&machine, &WorkerSettings::default());
        assert_eq!(
            script,
            "#!/bin/bash\n\npkill -u u1 -f slave.jar || true\npkill -u u1 -f rmiregistry || true\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_runs_stop_script_on_every_machine() {
        let (manager, mut mock) = SubprocessManager::mock();
        mock.expect_command("scp").returns_success().finish();
        mock.expect_command("ssh").returns_success().finish();

        let mut session = session();
        let report = cleanup(&mut session, &manager.ssh()).await;

        assert!(report.is_clean());
        assert_eq!(report.attempted, 2);
        assert_eq!(
            mock.count_calls(|c| c.program == "ssh"
                && c.args.last().is_some_and(|a| a.contains("sh cleanup_"))),
            2
        );
        let remote_copies: Vec<String> = mock
            .get_call_history()
            .iter()
            .filter(|c| c.program == "scp")
            .filter_map(|c| c.args.last().cloned())
            .collect();
        assert_eq!(
            remote_copies,
            vec!["u1@h1:/tmp/cleanup_u1.sh", "u2@h2:/tmp/cleanup_u2.sh"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_machine_is_reported_not_fatal() {
        let (manager, mut mock) = SubprocessManager::mock();
        mock.expect_command("scp").returns_success().finish();
        mock.expect_command("ssh")
            .with_args(|args| args.iter().any(|a| a == "u1@h1"))
            .returns_exit_code(255)
            .returns_stderr("ssh: connect to host h1 port 22: No route to host")
            .finish();
        mock.expect_command("ssh").returns_success().finish();

        let mut session = session();
        let report = cleanup(&mut session, &manager.ssh()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.succeeded(), 1);
        match &report.failures[0] {
            SqsError::Cleanup { host, message } => {
                assert_eq!(host, "h1");
                assert!(message.contains("No route to host"));
            }
            other => panic!("expected Cleanup error, got {other:?}"),
        }
        assert!(!report.failures[0].is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_skips_remote_run() {
        let (manager, mut mock) = SubprocessManager::mock();
        mock.expect_command("scp")
            .with_args(|args| args.iter().any(|a| a.starts_with("u2@h2:")))
            .returns_exit_code(1)
            .finish();
        mock.expect_command("scp").returns_success().finish();
        mock.expect_command("ssh").returns_success().finish();

        let mut session = session();
        let report = cleanup(&mut session, &manager.ssh()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(mock.count_calls(|c| c.program == "ssh"), 1);
    }
}
