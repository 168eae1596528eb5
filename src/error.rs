use std::path::{Path, PathBuf};

use thiserror::Error;

/// Typed diagnostics emitted by the rule compiler.
///
/// Every variant carries the 1-based line of the rule file that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("line {line}: unable to detect a reaction rule in '{text}'{}", suggestion_suffix(.suggestion))]
    Detection {
        line: usize,
        text: String,
        suggestion: Option<String>,
    },
    #[error("line {line}: {message}{}", allowed_suffix(.allowed))]
    Arrow {
        line: usize,
        message: String,
        allowed: Vec<String>,
    },
    #[error("{message} (lines {lines:?})")]
    Duplicate { lines: Vec<usize>, message: String },
    #[error("line {line}: '{name}' {message}")]
    Name {
        line: usize,
        name: String,
        message: String,
    },
    #[error("line {line}: {message}")]
    Value { line: usize, message: String },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(token) => format!(". Maybe: '{token}'"),
        None => String::new(),
    }
}

fn allowed_suffix(allowed: &[String]) -> String {
    if allowed.is_empty() {
        String::new()
    } else {
        format!("; use one of {}", allowed.join(" "))
    }
}

impl CompileError {
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Detection { line, .. }
            | Self::Arrow { line, .. }
            | Self::Name { line, .. }
            | Self::Value { line, .. } => Some(*line),
            Self::Duplicate { lines, .. } => lines.first().copied(),
        }
    }
}

/// Recoverable failure of a single simulation call.
///
/// The optimizer turns these into the sentinel objective value; callers
/// that need the trajectory see them through [`Error::Simulation`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationFailure {
    #[error("integration failed at t={t:.6e}: {reason}")]
    Integration { t: f64, reason: String },
    #[error("integration stopped at t={reached:.6e} before t={target:.6e}")]
    Incomplete { reached: f64, target: f64 },
    #[error("steady state not reached within {seconds:.1} s")]
    SteadyState { seconds: f64 },
    #[error("non-finite value in {0}")]
    NonFinite(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("structural error: {0}")]
    Structure(String),
    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationFailure),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{}: {message}", .path.display())]
    Storage { path: PathBuf, message: String },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn storage(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_error_mentions_suggestion() {
        let err = CompileError::Detection {
            line: 4,
            text: "A phosphorylats B".into(),
            suggestion: Some("phosphorylates".into()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("line 4"));
        assert!(msg.contains("Maybe: 'phosphorylates'"));
        assert_eq!(err.line(), Some(4));
    }

    #[test]
    fn detection_error_without_suggestion_has_no_hint() {
        let err = CompileError::Detection {
            line: 1,
            text: "nonsense".into(),
            suggestion: None,
        };
        assert!(!err.to_string().contains("Maybe"));
    }

    #[test]
    fn storage_error_names_the_path() {
        let err = Error::storage("/tmp/model/out/1", "run directory already exists");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/model/out/1"));
        assert!(msg.contains("already exists"));
    }

    #[test]
    fn io_error_keeps_source() {
        let err = Error::io("x", std::io::Error::other("inner"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn compile_errors_convert_into_crate_error() {
        let err: Error = CompileError::Value {
            line: 2,
            message: "negative initial value".into(),
        }
        .into();
        assert!(matches!(err, Error::Compile(CompileError::Value { line: 2, .. })));
    }
}
