use thiserror::Error;

use crate::coordinator::IllegalTransition;
use crate::engine::EngineError;

/// Errors surfaced by the orchestration layer.
///
/// Every variant except [`SqsError::Cleanup`] is fatal for the current run.
/// Cleanup failures are only ever collected into a
/// [`CleanupReport`](crate::cluster::CleanupReport) and logged.
#[derive(Error, Debug)]
pub enum SqsError {
    #[error("malformed machine config {origin} line {line_number}: {reason} ({line:?})")]
    MalformedConfig {
        origin: String,
        line_number: usize,
        line: String,
        reason: String,
    },

    #[error("machine config {origin} lists no machines")]
    EmptyRegistry { origin: String },

    #[error("invalid experiment config {origin}: {message}")]
    InvalidExperiment { origin: String, message: String },

    #[error("deployment to {host} failed running `{command}`: {reason}")]
    Deploy {
        host: String,
        command: String,
        exit_code: Option<i32>,
        reason: String,
    },

    #[error("authentication to {host} failed: {message}")]
    Auth { host: String, message: String },

    #[error("cleanup on {host} failed: {message}")]
    Cleanup { host: String, message: String },

    #[error("simulation engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqsError {
    pub fn malformed(
        origin: impl Into<String>,
        line_number: usize,
        line: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedConfig {
            origin: origin.into(),
            line_number,
            line: line.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_experiment(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExperiment {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SqsError::Cleanup { .. })
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Short label used in the one-line console summary.
    pub fn category(&self) -> &'static str {
        match self {
            SqsError::MalformedConfig { .. } | SqsError::EmptyRegistry { .. } => "configuration",
            SqsError::InvalidExperiment { .. } => "experiment configuration",
            SqsError::Deploy { .. } => "deployment",
            SqsError::Auth { .. } => "authentication",
            SqsError::Cleanup { .. } => "cleanup",
            SqsError::Engine(_) => "simulation engine",
            SqsError::Transition(_) => "internal",
            SqsError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, SqsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_errors_are_not_fatal() {
        let err = SqsError::Cleanup {
            host: "h1".into(),
            message: "ssh exited with 255".into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.category(), "cleanup");
    }

    #[test]
    fn test_malformed_config_message_names_line() {
        let err = SqsError::malformed("machines.cfg", 3, "h1 u1 /d", "expected 4 fields, found 3");
        let msg = err.to_string();
        assert!(msg.contains("machines.cfg line 3"));
        assert!(msg.contains("h1 u1 /d"));
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), 1);
    }
}
