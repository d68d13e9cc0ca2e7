use async_trait::async_trait;
use std::io::{BufRead, Write};

/// The person running `sqs setup`.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn ask_password(&self, prompt: &str) -> std::io::Result<String>;
}

/// Reads a password from the controlling terminal with echo turned off.
pub struct TerminalOperator;

#[async_trait]
impl OperatorPrompt for TerminalOperator {
    async fn ask_password(&self, prompt: &str) -> std::io::Result<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || read_hidden(&prompt))
            .await
            .map_err(std::io::Error::other)?
    }
}

fn read_hidden(prompt: &str) -> std::io::Result<String> {
    use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
    use std::os::fd::AsFd;

    let stdin = std::io::stdin();
    let mut stderr = std::io::stderr();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let saved = match tcgetattr(stdin.as_fd()) {
        Ok(termios) => {
            let mut hidden = termios.clone();
            hidden.local_flags.remove(LocalFlags::ECHO);
            tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &hidden)?;
            Some(termios)
        }
        Err(e) => {
            tracing::debug!("stdin is not a terminal ({}), password will echo", e);
            None
        }
    };

    let mut line = String::new();
    let read = stdin.lock().read_line(&mut line);

    if let Some(termios) = saved {
        tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &termios)?;
        writeln!(stderr)?;
    }
    read?;

    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Answers prompts from a fixed list, for tests and non-interactive use.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: std::sync::Mutex<std::collections::VecDeque<String>>,
    asked: std::sync::Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: std::sync::Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Prompts shown so far.
    pub fn prompts(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OperatorPrompt for ScriptedOperator {
    async fn ask_password(&self, prompt: &str) -> std::io::Result<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(prompt.to_string());
        }
        self.answers
            .lock()
            .map_err(|_| std::io::Error::other("operator answers poisoned"))?
            .pop_front()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no scripted answer left")
            })
    }
}
