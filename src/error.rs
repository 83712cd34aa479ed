//! Error handling for camb-pipes
//!
//! This module defines the crate-wide error type and a Result alias.
//! Per-channel decode failures are not part of this enum: they are
//! non-fatal and live in [`crate::analysis::DecodeError`].

use crate::types::RunResult;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Main error type for camb-pipes operations
#[derive(Error, Debug)]
pub enum CambError {
    /// Invalid configuration: missing executable, missing switch key, bad value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed `key = value` text
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Contradictory output switches (no combination is currently rejected)
    #[error("Plan error: {0}")]
    Plan(String),

    /// Failure to create, open or unlink an ephemeral channel
    #[error("Channel error at {path:?}: {source}")]
    Channel {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The executable could not be started
    #[error("Failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The executable ran but exited unsuccessfully
    ///
    /// Whatever the readers captured before the failure is kept in `partial`.
    #[error("Process failed with {status}")]
    ProcessFailed {
        status: ExitStatus,
        partial: Box<RunResult>,
    },

    /// A deadline expired while waiting on a channel or the process
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The two runs of a finite difference could not be combined
    #[error("Derivative error: {0}")]
    Derivative(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CambError>,
    },
}

impl CambError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CambError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a channel error for `path`
    pub fn channel(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CambError::Channel {
            path: path.into(),
            source,
        }
    }

    /// The innermost error, looking through any context wrappers
    pub fn root(&self) -> &CambError {
        match self {
            CambError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Partial results carried by a process failure, if any
    pub fn partial_result(&self) -> Option<&RunResult> {
        match self.root() {
            CambError::ProcessFailed { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Whether this error aborted a run before the process could finish
    pub fn is_fatal(&self) -> bool {
        !matches!(self.root(), CambError::ProcessFailed { .. })
    }
}

/// Result type alias for camb-pipes operations
pub type Result<T> = std::result::Result<T, CambError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CambError::Config("missing get_scalar_cls".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing get_scalar_cls");
    }

    #[test]
    fn test_parse_error_line() {
        let err = CambError::Parse {
            line: 7,
            message: "expected '='".to_string(),
        };
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_error_with_context() {
        let err = CambError::Timeout("reader".to_string());
        let with_ctx = err.with_context("derivative high step");
        assert!(with_ctx.to_string().contains("derivative high step"));
        assert!(matches!(with_ctx.root(), CambError::Timeout(_)));
        assert!(with_ctx.is_fatal());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_failed_keeps_partial() {
        use std::os::unix::process::ExitStatusExt;

        let err = CambError::ProcessFailed {
            status: ExitStatus::from_raw(3 << 8),
            partial: Box::new(RunResult::default()),
        }
        .with_context("invoke");

        assert!(!err.is_fatal());
        assert!(err.partial_result().is_some());
    }
}
