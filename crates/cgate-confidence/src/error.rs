//! Error types for evidence collection
//!
//! Scoring itself never fails: every error here degrades one metric.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while gathering evidence
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// Parser could not be configured for the language
    #[error("parser init failed: {0}")]
    ParserInit(String),

    /// A bounded step exceeded its budget
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// Test command could not be started or crashed
    #[error("test runner failed: {0}")]
    Runner(String),

    /// IO error while staging or reading
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Project memory could not be read or parsed
    #[error("project memory error: {0}")]
    Memory(String),

    /// Rule table invalid
    #[error("rule '{id}' is invalid: {message}")]
    InvalidRule { id: String, message: String },
}

impl ScoringError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create timeout error
    #[must_use]
    pub fn timeout(stage: &'static str, after: Duration) -> Self {
        Self::Timeout { stage, after }
    }
}
