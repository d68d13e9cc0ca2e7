use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::{DetachedProcess, ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};
use crate::cluster::MachineEntry;

/// Options shared by every ssh, scp and rsync invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    /// Refuse to prompt; a missing key fails fast instead of hanging.
    pub batch_mode: bool,
    pub connect_timeout: Option<Duration>,
    pub extra_options: Vec<String>,
}

impl SshOptions {
    /// Options for the credential setup flow, where prompts are expected.
    pub fn interactive() -> Self {
        Self {
            batch_mode: false,
            ..Self::default()
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.batch_mode {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        if let Some(timeout) = self.connect_timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }
        for option in &self.extra_options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            batch_mode: true,
            connect_timeout: Some(Duration::from_secs(10)),
            extra_options: Vec::new(),
        }
    }
}

/// `ssh user@host '<remote_command>'`
pub fn ssh_command(
    options: &SshOptions,
    machine: &MachineEntry,
    remote_command: &str,
) -> ProcessCommandBuilder {
    ProcessCommandBuilder::new("ssh")
        .args(options.to_args())
        .arg(&machine.target())
        .arg(remote_command)
}

/// `scp -q <local> user@host:<remote_path>`
pub fn scp_command(
    options: &SshOptions,
    machine: &MachineEntry,
    local: &Path,
    remote_path: &str,
) -> ProcessCommandBuilder {
    ProcessCommandBuilder::new("scp")
        .arg("-q")
        .args(options.to_args())
        .arg(&local.display().to_string())
        .arg(&format!("{}:{}", machine.target(), remote_path))
}

/// `rsync -a --delete -e 'ssh ...' <local_root>/ user@host:<remote_dir>/`
pub fn rsync_command(
    options: &SshOptions,
    machine: &MachineEntry,
    local_root: &Path,
    remote_dir: &str,
) -> ProcessCommandBuilder {
    let mut transport = vec!["ssh".to_string()];
    transport.extend(options.to_args());

    ProcessCommandBuilder::new("rsync")
        .args(["-a", "--delete", "-e"])
        .arg(&transport.join(" "))
        .arg(&with_trailing_slash(&local_root.display().to_string()))
        .arg(&format!(
            "{}:{}",
            machine.target(),
            with_trailing_slash(remote_dir)
        ))
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Translate a finished remote command into a result, keeping stderr for
/// the caller's error message.
#[inline]
pub fn check_command_success(output: &ProcessOutput) -> Result<(), ProcessError> {
    match output.status {
        ExitStatus::Success => Ok(()),
        ExitStatus::Timeout => Err(ProcessError::Timeout(output.duration)),
        ExitStatus::Signal(signal) => Err(ProcessError::Signal(signal)),
        ExitStatus::Error(code) => Err(ProcessError::ExitCode(code)),
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `remote_command` on the machine and wait for it.
    async fn exec(
        &self,
        machine: &MachineEntry,
        remote_command: &str,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError>;

    /// Start `remote_command` on the machine without waiting for it.
    async fn exec_detached(
        &self,
        machine: &MachineEntry,
        remote_command: &str,
    ) -> Result<DetachedProcess, ProcessError>;

    /// Copy one local file to `remote_path` on the machine.
    async fn push(
        &self,
        machine: &MachineEntry,
        local: &Path,
        remote_path: &str,
    ) -> Result<ProcessOutput, ProcessError>;

    /// Make `remote_dir` on the machine an exact mirror of `local_root`.
    async fn mirror(
        &self,
        machine: &MachineEntry,
        local_root: &Path,
        remote_dir: &str,
    ) -> Result<ProcessOutput, ProcessError>;

    /// The exact command `exec` would issue, for logs and error messages.
    fn describe_exec(&self, machine: &MachineEntry, remote_command: &str) -> ProcessCommand;
}

pub struct SshRunnerImpl {
    runner: Arc<dyn ProcessRunner>,
    options: SshOptions,
}

impl SshRunnerImpl {
    pub fn new(runner: Arc<dyn ProcessRunner>, options: SshOptions) -> Self {
        Self { runner, options }
    }
}

#[async_trait]
impl RemoteShell for SshRunnerImpl {
    async fn exec(
        &self,
        machine: &MachineEntry,
        remote_command: &str,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        let command = ssh_command(&self.options, machine, remote_command)
            .timeout_opt(timeout)
            .build();
        self.runner.run(command).await
    }

    async fn exec_detached(
        &self,
        machine: &MachineEntry,
        remote_command: &str,
    ) -> Result<DetachedProcess, ProcessError> {
        let command = ssh_command(&self.options, machine, remote_command).build();
        self.runner.spawn_detached(command).await
    }

    async fn push(
        &self,
        machine: &MachineEntry,
        local: &Path,
        remote_path: &str,
    ) -> Result<ProcessOutput, ProcessError> {
        let command = scp_command(&self.options, machine, local, remote_path).build();
        self.runner.run(command).await
    }

    async fn mirror(
        &self,
        machine: &MachineEntry,
        local_root: &Path,
        remote_dir: &str,
    ) -> Result<ProcessOutput, ProcessError> {
        let command = rsync_command(&self.options, machine, local_root, remote_dir).build();
        self.runner.run(command).await
    }

    fn describe_exec(&self, machine: &MachineEntry, remote_command: &str) -> ProcessCommand {
        ssh_command(&self.options, machine, remote_command).build()
    }
}
