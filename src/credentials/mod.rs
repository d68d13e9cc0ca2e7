//! Passwordless access setup (`sqs setup`)
//!
//! Makes sure a local RSA key pair exists, then installs the public key in
//! `~/.ssh/authorized_keys` on every machine. Both remote steps go through
//! ssh/scp prompts, which are answered by the [`AuthState`] machine: host
//! keys are accepted, the operator's password is asked once and reused, and
//! one corrected password is allowed after a rejection.

pub mod channel;
pub mod operator;
pub mod state;

#[cfg(test)]
mod tests;

pub use channel::{classify_prompt, ChannelFactory, InteractiveChannel, PtyChannelFactory};
pub use operator::{OperatorPrompt, ScriptedOperator, TerminalOperator};
pub use state::{AuthAction, AuthState, PromptEvent, Reply};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cluster::{ClusterSession, MachineEntry};
use crate::error::{Result, SqsError};
use crate::subprocess::ssh::{scp_command, ssh_command};
use crate::subprocess::{
    check_command_success, ProcessCommand, ProcessCommandBuilder, ProcessRunner, SshOptions,
};

const PASSWORD_PROMPT: &str = "Password for cluster accounts: ";
const RETRY_PROMPT: &str = "Permission denied, please try again. Password: ";
const INSTALL_KEY: &str = "if [ ! -e ~/.ssh ]; then mkdir ~/.ssh; fi && cat ~/id_rsa.pub >> ~/.ssh/authorized_keys";

/// Default key location: `~/.ssh`.
pub fn default_ssh_dir() -> Result<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh")).ok_or_else(|| {
        SqsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cannot determine home directory",
        ))
    })
}

/// Ensure `<ssh_dir>/id_rsa` and `id_rsa.pub` exist, generating what is
/// missing. Returns the public key path.
pub async fn ensure_key_pair(runner: &dyn ProcessRunner, ssh_dir: &Path) -> Result<PathBuf> {
    let private = ssh_dir.join("id_rsa");
    let public = ssh_dir.join("id_rsa.pub");

    if private.exists() && public.exists() {
        tracing::debug!("Using existing key pair in {}", ssh_dir.display());
        return Ok(public);
    }

    std::fs::create_dir_all(ssh_dir)?;
    let private_arg = private.display().to_string();

    if private.exists() {
        tracing::info!("Regenerating {} from private key", public.display());
        let command = ProcessCommandBuilder::new("ssh-keygen")
            .args(["-y", "-f", private_arg.as_str()])
            .build();
        let output = run_keygen(runner, command).await?;
        std::fs::write(&public, output.stdout)?;
    } else {
        tracing::info!("Generating RSA key pair in {}", ssh_dir.display());
        let command = ProcessCommandBuilder::new("ssh-keygen")
            .args(["-q", "-t", "rsa", "-N", "", "-f", private_arg.as_str()])
            .build();
        run_keygen(runner, command).await?;
    }

    Ok(public)
}

async fn run_keygen(
    runner: &dyn ProcessRunner,
    command: ProcessCommand,
) -> Result<crate::subprocess::ProcessOutput> {
    let shown = command.display();
    let output = runner.run(command).await.map_err(|e| SqsError::Auth {
        host: "localhost".to_string(),
        message: format!("`{shown}` failed: {e}"),
    })?;
    check_command_success(&output).map_err(|e| SqsError::Auth {
        host: "localhost".to_string(),
        message: format!("`{shown}` failed: {e}: {}", output.stderr.trim()),
    })?;
    Ok(output)
}

/// Result of setting up one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub host: String,
    pub host_key_accepted: bool,
    pub rejections: u8,
}

#[derive(Debug, Default)]
struct Negotiation {
    host_key_accepted: bool,
    rejections: u8,
}

pub struct CredentialBootstrapper {
    factory: Arc<dyn ChannelFactory>,
    operator: Arc<dyn OperatorPrompt>,
    options: SshOptions,
}

impl CredentialBootstrapper {
    pub fn new(factory: Arc<dyn ChannelFactory>, operator: Arc<dyn OperatorPrompt>) -> Self {
        Self {
            factory,
            operator,
            options: SshOptions::interactive(),
        }
    }

    /// Install `public_key` on every machine in the session.
    pub async fn ensure_access(
        &self,
        session: &mut ClusterSession,
        public_key: &Path,
    ) -> Result<Vec<AuthOutcome>> {
        let machines = session.registry().machines().to_vec();
        let mut outcomes = Vec::with_capacity(machines.len());

        for machine in &machines {
            println!("Setting up access to {}", machine.target());
            // A password corrected after a rejection applies to this machine
            // only; the next machine starts from the first one entered.
            let mut corrected = None;

            let copy = scp_command(&self.options, machine, public_key, "~").build();
            let first = self.negotiate(session, machine, copy, &mut corrected).await?;

            let install = ssh_command(&self.options, machine, INSTALL_KEY).build();
            let second = self.negotiate(session, machine, install, &mut corrected).await?;

            outcomes.push(AuthOutcome {
                host: machine.host.clone(),
                host_key_accepted: first.host_key_accepted || second.host_key_accepted,
                rejections: first.rejections + second.rejections,
            });
        }

        tracing::info!("Key installed on {} machine(s)", outcomes.len());
        Ok(outcomes)
    }

    async fn negotiate(
        &self,
        session: &mut ClusterSession,
        machine: &MachineEntry,
        command: ProcessCommand,
        corrected: &mut Option<String>,
    ) -> Result<Negotiation> {
        let auth_error = |message: String| SqsError::Auth {
            host: machine.host.clone(),
            message,
        };

        let shown = command.display();
        let mut channel = self
            .factory
            .open(command)
            .await
            .map_err(|e| auth_error(format!("cannot start `{shown}`: {e}")))?;

        let mut state = AuthState::initial();
        let mut stats = Negotiation::default();

        while !state.is_terminal() {
            let event = match channel.next_event().await {
                Ok(event) => event,
                Err(e) => {
                    channel.abort().await;
                    return Err(auth_error(format!("`{shown}`: {e}")));
                }
            };
            let (next, action) = state.step(event);
            tracing::debug!("{}: {:?} in {:?} -> {:?}, {:?}", machine.host, event, state, next, action);
            state = next;

            let sent = match action {
                AuthAction::SendLine(Reply::AcceptHostKey) => {
                    stats.host_key_accepted = true;
                    channel.send_line("yes").await
                }
                AuthAction::SendLine(Reply::CachedPassword | Reply::CorrectedPassword) => {
                    let password = match corrected.as_ref() {
                        Some(password) => password.clone(),
                        None => self.password(session).await?,
                    };
                    channel.send_line(&password).await
                }
                AuthAction::RepromptOperator => {
                    stats.rejections += 1;
                    let password = self
                        .operator
                        .ask_password(RETRY_PROMPT)
                        .await
                        .map_err(|e| auth_error(format!("reading password: {e}")))?;
                    *corrected = Some(password);
                    Ok(())
                }
                AuthAction::Done => Ok(()),
            };
            if let Err(e) = sent {
                channel.abort().await;
                return Err(auth_error(format!("writing to `{shown}`: {e}")));
            }
        }

        tracing::debug!(
            "Transcript of `{}`:\n{}",
            shown,
            channel.transcript().trim_end()
        );

        if state == AuthState::Failed {
            channel.abort().await;
            return Err(auth_error(format!(
                "password rejected twice while running `{shown}`"
            )));
        }

        let status = channel
            .finish()
            .await
            .map_err(|e| auth_error(format!("`{shown}`: {e}")))?;
        if !status.success() {
            let last_line = channel
                .transcript()
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .trim()
                .to_string();
            return Err(auth_error(format!(
                "`{shown}` finished with {status}: {last_line}"
            )));
        }

        Ok(stats)
    }

    /// Cached session password, asking the operator the first time.
    async fn password(&self, session: &mut ClusterSession) -> Result<String> {
        if let Some(password) = session.password() {
            return Ok(password.to_string());
        }
        let password = self
            .operator
            .ask_password(PASSWORD_PROMPT)
            .await
            .map_err(SqsError::Io)?;
        session.cache_password(password.clone());
        Ok(password)
    }
}
