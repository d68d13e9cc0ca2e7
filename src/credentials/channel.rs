//! Interactive command channels for the credential setup flow.
//!
//! ssh and scp only prompt for host keys and passwords on a terminal, so the
//! production channel runs them on a pseudo-terminal and scans what they
//! print for the prompts [`classify_prompt`] knows about.

use async_trait::async_trait;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::sync::mpsc;

use super::state::PromptEvent;
use crate::subprocess::{ExitStatus, ProcessCommand, ProcessError};

const HOST_KEY_PROMPT: &str = "are you sure you want to continue connecting";
const DENIED: &str = "permission denied";
const PASSWORD_PROMPT: &str = "password:";

/// Find the earliest known prompt in `buffer`. Returns the event and the
/// number of bytes up to and including the match.
pub fn classify_prompt(buffer: &str) -> Option<(PromptEvent, usize)> {
    let lowered = buffer.to_ascii_lowercase();

    [
        (HOST_KEY_PROMPT, PromptEvent::HostKeyConfirmation),
        (DENIED, PromptEvent::PermissionDenied),
        (PASSWORD_PROMPT, PromptEvent::PasswordPrompt),
    ]
    .into_iter()
    .filter_map(|(needle, event)| lowered.find(needle).map(|at| (at, at + needle.len(), event)))
    .min_by_key(|(start, _, _)| *start)
    .map(|(_, end, event)| (event, end))
}

#[async_trait]
pub trait InteractiveChannel: Send {
    /// Wait for the next recognised prompt, or `EndOfStream` once the
    /// command stops producing output.
    async fn next_event(&mut self) -> Result<PromptEvent, ProcessError>;

    async fn send_line(&mut self, line: &str) -> Result<(), ProcessError>;

    /// Everything the command printed so far. Typed input is not included.
    fn transcript(&self) -> &str;

    /// Wait for the command to exit.
    async fn finish(&mut self) -> Result<ExitStatus, ProcessError>;

    /// Kill the command; used when negotiation failed and it may still be
    /// waiting for input.
    async fn abort(&mut self);
}

#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(
        &self,
        command: ProcessCommand,
    ) -> Result<Box<dyn InteractiveChannel>, ProcessError>;
}

/// Opens [`PtyChannel`]s.
pub struct PtyChannelFactory {
    idle_timeout: Duration,
}

impl PtyChannelFactory {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }
}

impl Default for PtyChannelFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl ChannelFactory for PtyChannelFactory {
    async fn open(
        &self,
        command: ProcessCommand,
    ) -> Result<Box<dyn InteractiveChannel>, ProcessError> {
        let channel = PtyChannel::spawn(&command, self.idle_timeout)?;
        Ok(Box::new(channel))
    }
}

pub struct PtyChannel {
    command: String,
    child: Option<Child>,
    writer: std::fs::File,
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: String,
    transcript: String,
    idle_timeout: Duration,
    closed: bool,
}

impl PtyChannel {
    pub fn spawn(command: &ProcessCommand, idle_timeout: Duration) -> Result<Self, ProcessError> {
        use nix::pty::openpty;

        let shown = command.display();
        tracing::debug!("Starting interactive: {}", shown);

        let pty = openpty(None, None).map_err(|e| ProcessError::SpawnFailed {
            command: shown.clone(),
            source: e.into(),
        })?;
        let slave_path = nix::unistd::ttyname(&pty.slave).map_err(|e| {
            ProcessError::SpawnFailed {
                command: shown.clone(),
                source: e.into(),
            }
        })?;

        let slave_path = {
            use std::os::unix::ffi::OsStrExt;
            std::ffi::CString::new(slave_path.as_os_str().as_bytes()).map_err(|e| {
                ProcessError::InternalError {
                    message: format!("bad pty path: {e}"),
                }
            })?
        };

        let stdio = |fd: &OwnedFd| -> Result<Stdio, ProcessError> { Ok(Stdio::from(fd.try_clone()?)) };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(stdio(&pty.slave)?)
            .stdout(stdio(&pty.slave)?)
            .stderr(stdio(&pty.slave)?);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        // SAFETY: only async-signal-safe calls (setsid, open) run between
        // fork and exec.
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(move || {
                nix::unistd::setsid()?;
                // Opening the terminal after setsid makes it the controlling
                // terminal, which is where ssh reads passwords from.
                let _ctty = nix::fcntl::open(
                    slave_path.as_c_str(),
                    nix::fcntl::OFlag::O_RDWR,
                    nix::sys::stat::Mode::empty(),
                )?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::CommandNotFound(command.program.clone())
            } else {
                ProcessError::SpawnFailed {
                    command: shown.clone(),
                    source: e,
                }
            }
        })?;
        // The child owns the slave side now; our copies would keep the
        // master from ever seeing end of stream.
        drop(cmd);
        drop(pty.slave);

        let reader = std::fs::File::from(pty.master);
        let writer = reader.try_clone()?;
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || pump(reader, tx));

        Ok(Self {
            command: shown,
            child: Some(child),
            writer,
            chunks: rx,
            pending: String::new(),
            transcript: String::new(),
            idle_timeout,
            closed: false,
        })
    }
}

/// Copy pty output into the channel until the slave side closes. Linux
/// reports that as EIO rather than a zero-length read.
fn pump(mut reader: std::fs::File, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl InteractiveChannel for PtyChannel {
    async fn next_event(&mut self) -> Result<PromptEvent, ProcessError> {
        loop {
            if let Some((event, consumed)) = classify_prompt(&self.pending) {
                self.pending.drain(..consumed);
                return Ok(event);
            }
            if self.closed {
                return Ok(PromptEvent::EndOfStream);
            }

            match tokio::time::timeout(self.idle_timeout, self.chunks.recv()).await {
                Ok(Some(chunk)) => {
                    let text = String::from_utf8_lossy(&chunk);
                    for line in text.lines().filter(|l| !l.trim().is_empty()) {
                        tracing::debug!(target: "sqs::subprocess::output", "[{}] {}", self.command, line.trim_end());
                    }
                    self.pending.push_str(&text);
                    self.transcript.push_str(&text);
                }
                Ok(None) => self.closed = true,
                Err(_) => return Err(ProcessError::Timeout(self.idle_timeout)),
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ProcessError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn transcript(&self) -> &str {
        &self.transcript
    }

    async fn finish(&mut self) -> Result<ExitStatus, ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Err(ProcessError::InternalError {
                message: format!("{} already finished", self.command),
            });
        };

        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .map_err(|e| ProcessError::InternalError {
                message: e.to_string(),
            })??;

        Ok(match status.code() {
            Some(0) => ExitStatus::Success,
            Some(code) => ExitStatus::Error(code),
            None => {
                use std::os::unix::process::ExitStatusExt;
                ExitStatus::Signal(status.signal().unwrap_or(-1))
            }
        })
    }

    async fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("Could not kill {}: {}", self.command, e);
            }
            // Reap it so it does not linger as a zombie.
            let _ = tokio::task::spawn_blocking(move || child.wait()).await;
        }
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::ProcessCommandBuilder;

    #[test]
    fn test_classify_host_key_prompt() {
        let text = "The authenticity of host 'h1 (10.0.0.1)' can't be established.\n\
                    ECDSA key fingerprint is SHA256:abc.\n\
                    Are you sure you want to continue connecting (yes/no/[fingerprint])? ";
        let (event, consumed) = classify_prompt(text).unwrap();
        assert_eq!(event, PromptEvent::HostKeyConfirmation);
        assert!(text[consumed..].starts_with(" (yes/no"));
    }

    #[test]
    fn test_classify_password_case_insensitive() {
        assert_eq!(
            classify_prompt("u1@h1's Password: ").map(|(e, _)| e),
            Some(PromptEvent::PasswordPrompt)
        );
    }

    #[test]
    fn test_classify_picks_earliest_prompt() {
        let text = "Permission denied, please try again.\r\nu1@h1's password: ";
        let (event, consumed) = classify_prompt(text).unwrap();
        assert_eq!(event, PromptEvent::PermissionDenied);

        let (next, _) = classify_prompt(&text[consumed..]).unwrap();
        assert_eq!(next, PromptEvent::PasswordPrompt);
    }

    #[test]
    fn test_classify_ignores_plain_output() {
        assert!(classify_prompt("Warning: Permanently added 'h1' to the list").is_none());
    }

    #[tokio::test]
    async fn test_pty_channel_answers_prompt() {
        let command = ProcessCommandBuilder::new("sh")
            .arg("-c")
            .arg("printf 'password: '; read pw; echo \"got $pw\"")
            .build();
        let mut channel = PtyChannel::spawn(&command, Duration::from_secs(10)).unwrap();

        assert_eq!(channel.next_event().await.unwrap(), PromptEvent::PasswordPrompt);
        channel.send_line("secret").await.unwrap();
        assert_eq!(channel.next_event().await.unwrap(), PromptEvent::EndOfStream);
        assert!(channel.finish().await.unwrap().success());
        assert!(channel.transcript().contains("got secret"));
    }
}
