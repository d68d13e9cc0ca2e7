use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::protocol::{EngineRequest, EngineResponse};
use super::types::{BatchReceipt, Experiment, ExperimentResult, WorkerEndpoint};
use super::{EngineError, SimulationEngine};

/// How to start the engine executable. Lives in the `[engine]` table of the
/// experiment config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// How long to wait for a clean exit after a shutdown request before
    /// sending SIGTERM.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

impl EngineConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            shutdown_timeout: default_shutdown_timeout(),
        }
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, shell_words::join(&self.args))
        }
    }
}

struct EngineChild {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Engine executable driven over newline-delimited JSON on stdin/stdout.
///
/// The child is started on first use and lives until [`shutdown`]. Requests
/// are serialized through a mutex; the protocol has exactly one request in
/// flight at a time.
///
/// [`shutdown`]: SimulationEngine::shutdown
pub struct ProcessEngine {
    config: EngineConfig,
    child: Mutex<Option<EngineChild>>,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
        }
    }

    fn spawn(&self) -> Result<EngineChild, EngineError> {
        tracing::debug!("Starting engine: {}", self.config.display());

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            command: self.config.display(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "sqs::engine", "stderr: {}", line);
                }
            });
        }

        tracing::info!(
            "Engine started (pid {})",
            child.id().map_or_else(|| "?".to_string(), |p| p.to_string())
        );

        Ok(EngineChild {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn request(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let mut guard = self.child.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let engine = guard.as_mut().ok_or(EngineError::Closed)?;

        tracing::debug!(target: "sqs::engine", "-> {}", request.op());
        let line = request.encode()?;
        engine.stdin.write_all(line.as_bytes()).await?;
        engine.stdin.flush().await?;

        read_response(&mut engine.stdout).await
    }
}

async fn read_response(
    stdout: &mut Lines<BufReader<ChildStdout>>,
) -> Result<EngineResponse, EngineError> {
    while let Some(line) = stdout.next_line().await? {
        match EngineResponse::decode(&line)? {
            Some(response) => {
                tracing::debug!(target: "sqs::engine", "<- {:?}", response_label(&response));
                return Ok(response);
            }
            None => tracing::debug!(target: "sqs::engine", "stdout: {}", line),
        }
    }
    Err(EngineError::Closed)
}

fn response_label(response: &EngineResponse) -> &'static str {
    match response {
        EngineResponse::Converged { .. } => "converged",
        EngineResponse::Accepted { .. } => "accepted",
        EngineResponse::Stopped => "stopped",
        EngineResponse::Error { .. } => "error",
    }
}

fn unexpected(op: &str, response: EngineResponse) -> EngineError {
    match response {
        EngineResponse::Error { message } => EngineError::Remote { message },
        other => EngineError::Protocol(format!(
            "unexpected `{}` reply to {}",
            response_label(&other),
            op
        )),
    }
}

#[async_trait]
impl SimulationEngine for ProcessEngine {
    async fn run(&self, experiment: &Experiment) -> Result<ExperimentResult, EngineError> {
        let response = self
            .request(EngineRequest::Run {
                experiment: experiment.clone(),
            })
            .await?;
        match response {
            EngineResponse::Converged { result } => Ok(result),
            other => Err(unexpected("run", other)),
        }
    }

    async fn run_batch(
        &self,
        experiments: &[Experiment],
        workers: &[WorkerEndpoint],
    ) -> Result<BatchReceipt, EngineError> {
        let response = self
            .request(EngineRequest::RunBatch {
                experiments: experiments.to_vec(),
                workers: workers.to_vec(),
            })
            .await?;
        match response {
            EngineResponse::Accepted { accepted } => Ok(BatchReceipt { accepted }),
            other => Err(unexpected("run_batch", other)),
        }
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        let Some(mut engine) = self.child.lock().await.take() else {
            return Ok(());
        };

        if let Ok(line) = EngineRequest::Shutdown.encode() {
            if let Err(e) = engine.stdin.write_all(line.as_bytes()).await {
                tracing::debug!("Engine stdin already closed: {}", e);
            }
        }
        drop(engine.stdin);

        let timeout = self.config.shutdown_timeout;
        match tokio::time::timeout(timeout, engine.child.wait()).await {
            Ok(status) => {
                tracing::debug!("Engine exited: {:?}", status?);
                return Ok(());
            }
            Err(_) => tracing::warn!("Engine did not exit within {:?}, sending SIGTERM", timeout),
        }

        if let Some(pid) = engine.child.id() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!("SIGTERM to engine pid {} failed: {}", pid, e);
            }
        }

        if tokio::time::timeout(timeout, engine.child.wait()).await.is_err() {
            tracing::warn!("Engine ignored SIGTERM, killing it");
            engine.child.kill().await?;
        }
        Ok(())
    }
}
