//! Process execution layer
//!
//! Every local and remote command the orchestrator issues goes through
//! [`ProcessRunner`], so tests can swap in [`MockProcessRunner`] and inspect
//! exactly which ssh/scp/rsync invocations a component made.

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;
pub mod ssh;

#[cfg(test)]
mod tests;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{
    DetachedProcess, ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner,
};
pub use ssh::{check_command_success, RemoteShell, SshOptions, SshRunnerImpl};

use std::sync::Arc;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(runner::TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    /// Non-interactive remote shell used by deploy, cleanup and launch.
    pub fn ssh(&self) -> SshRunnerImpl {
        SshRunnerImpl::new(Arc::clone(&self.runner), SshOptions::default())
    }
}
