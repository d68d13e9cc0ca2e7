use super::deploy::require_success;
use super::script::LaunchScriptBuilder;
use super::session::ClusterSession;
use crate::error::{Result, SqsError};
use crate::subprocess::{DetachedProcess, RemoteShell};

/// Start the worker stack on every machine.
///
/// For machine `i` the launch script is staged locally as `slave_<i>.sh`,
/// copied to `<staging>/slave_<i>_<user>.sh` and executed detached. A failed
/// copy or spawn is fatal. After each launch the call pauses for
/// `launch_settle`, and once every machine is started it waits a further
/// `master_start_delay` so lookup services are up before anyone connects.
pub async fn launch_all(
    session: &mut ClusterSession,
    shell: &dyn RemoteShell,
    builder: &LaunchScriptBuilder,
) -> Result<Vec<DetachedProcess>> {
    let timing = session.settings().timing.clone();
    let machines = session.registry().machines().to_vec();
    let staging = builder.settings().staging_dir.trim_end_matches('/').to_string();

    let mut launched = Vec::with_capacity(machines.len());
    for (index, machine) in machines.iter().enumerate() {
        let script = builder.build(machine, index)?;
        let local = session.write_artifact(&LaunchScriptBuilder::local_name(index), &script)?;
        let remote = builder.remote_path(machine, index);

        let result = shell.push(machine, &local, &remote).await;
        require_success(machine, &format!("scp {} {}", local.display(), remote), result)?;

        let command = format!(
            "cd {} && sh {}",
            shell_words::quote(&staging),
            LaunchScriptBuilder::remote_name(machine, index)
        );
        let process = shell
            .exec_detached(machine, &command)
            .await
            .map_err(|e| SqsError::Deploy {
                host: machine.host.clone(),
                command: shell.describe_exec(machine, &command).display(),
                exit_code: None,
                reason: e.to_string(),
            })?;

        tracing::info!(
            "Launched {} worker(s) on {} ({})",
            machine.worker_count,
            machine.target(),
            process.pid.map_or_else(|| "no pid".to_string(), |p| format!("pid {p}"))
        );
        launched.push(process);

        tokio::time::sleep(timing.launch_settle).await;
    }

    tracing::debug!(
        "Waiting {:?} for worker stacks to come up",
        timing.master_start_delay
    );
    tokio::time::sleep(timing.master_start_delay).await;

    Ok(launched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSettings, MachineEntry, MachineRegistry, WorkerSettings};
    use crate::subprocess::SubprocessManager;
    use std::time::Duration;

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

    #[tokio::test(start_paused = true)]
    async fn test_launch_pushes_and_starts_one_script_per_machine() {
        let (manager, mut mock) = SubprocessManager::mock();
        mock.expect_command("scp").returns_success().finish();
        mock.expect_command("ssh").returns_success().finish();

        let mut session = session();
        let builder = LaunchScriptBuilder::new(&WorkerSettings::default()).unwrap();

        let started = tokio::time::Instant::now();
        let launched = launch_all(&mut session, &manager.ssh(), &builder)
            .await
            .unwrap();
        assert_eq!(launched.len(), 2);
        // Two settle pauses plus the master start delay.
        assert!(started.elapsed() >= Duration::from_secs(5));

        let detached = mock.get_detached_history();
        assert_eq!(detached.len(), 2);
        assert_eq!(
            detached[0].args.last().unwrap(),
            "cd /tmp && sh slave_0_u1.sh"
        );
        assert_eq!(
            detached[1].args.last().unwrap(),
            "cd /tmp && sh slave_1_u2.sh"
        );

        let staged = session.generated_artifacts();
        assert_eq!(staged.len(), 2);
        let script = std::fs::read_to_string(&staged[1]).unwrap();
        assert_eq!(script.lines().filter(|l| l.ends_with(" &")).count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_copy_aborts_launch() {
        let (manager, mut mock) = SubprocessManager::mock();
        mock.expect_command("scp")
            .returns_exit_code(1)
            .returns_stderr("scp: /tmp/slave_0_u1.sh: Permission denied")
            .finish();

        let mut session = session();
        let builder = LaunchScriptBuilder::new(&WorkerSettings::default()).unwrap();

        let err = launch_all(&mut session, &manager.ssh(), &builder)
            .await
            .unwrap_err();
        assert!(matches!(err, SqsError::Deploy { ref host, .. } if host == "h1"));
        assert!(mock.get_detached_history().is_empty());
    }
}
