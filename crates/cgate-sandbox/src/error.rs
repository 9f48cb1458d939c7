//! Error types for the sandbox isolation layer
//!
//! Path and policy violations pass through unchanged so callers can fail
//! closed; everything else is an isolation failure.

use std::path::PathBuf;

use cgate_policy::PolicyError;
use cgate_security::CryptoError;

/// Errors raised by [`crate::Sandbox`]
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Path or policy check failed; nothing was written
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Sealing failed; nothing was written
    #[error("sealing failed: {0}")]
    Crypto(#[from] CryptoError),

    /// A mutating operation is in flight
    #[error("sandbox busy: cannot {0} while another operation is in flight")]
    Busy(&'static str),

    /// Neither the mirror nor the project tree has the file
    #[error("file not found in mirror or project: {0}")]
    NotFound(String),

    /// Filesystem failure inside the state directory or project tree
    #[error("isolation failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation log could not be read or appended
    #[error("operation log error: {0}")]
    Log(String),
}

impl SandboxError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check whether this is a fail-closed path or policy rejection
    #[inline]
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::Policy(_))
    }
}
