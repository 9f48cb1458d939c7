//! Error types for the confidence-gated sandbox
//!
//! Every rejection maps to a machine-checkable [`ReasonCode`], a remediation
//! hint, and the [`ExitStatus`] the command layer reports.

use std::fmt;

use cgate_confidence::ScoringError;
use cgate_decision::DecisionError;
use cgate_policy::PolicyError;
use cgate_sandbox::SandboxError;
use cgate_security::{CryptoError, SafetyRisk, SecurityError};
use serde::{Deserialize, Serialize};

/// Main cgate error type
#[derive(Debug, thiserror::Error)]
pub enum CgateError {
    /// Path or policy check failed
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Mirror operation failed
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Pattern table or scan failure
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Sealing or key management failed; nothing was persisted
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Scorer could not be set up
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    /// Gate thresholds rejected
    #[error(transparent)]
    Decision(#[from] DecisionError),

    /// Content failed the safety heuristics
    #[error("unsafe content for {path}: {}", join_risks(.risks))]
    UnsafeContent { path: String, risks: Vec<SafetyRisk> },

    /// Content is not valid UTF-8 text
    #[error("content of {0} is not valid UTF-8")]
    NotText(String),

    /// Nothing in the mirror to act on
    #[error("no candidate in the sandbox: {0}")]
    NoCandidate(String),

    /// Configuration file invalid
    #[error("configuration error: {0}")]
    Config(String),
}

fn join_risks(risks: &[SafetyRisk]) -> String {
    risks.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Machine-checkable rejection category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    PathViolation,
    PolicyViolation,
    ParseFailure,
    ExecutionTimeout,
    ExecutionFailure,
    SecurityFinding,
    EncryptionFailure,
    IsolationFailure,
    SandboxBusy,
    UnsafeContent,
    NotFound,
    Configuration,
}

impl ReasonCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PathViolation => "path_violation",
            Self::PolicyViolation => "policy_violation",
            Self::ParseFailure => "parse_failure",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ExecutionFailure => "execution_failure",
            Self::SecurityFinding => "security_finding",
            Self::EncryptionFailure => "encryption_failure",
            Self::IsolationFailure => "isolation_failure",
            Self::SandboxBusy => "sandbox_busy",
            Self::UnsafeContent => "unsafe_content",
            Self::NotFound => "not_found",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process exit status reported by the command layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success = 0,
    ValidationFailure = 1,
    AccessDenied = 2,
    PolicyViolation = 3,
    ExecutionFailure = 4,
}

impl ExitStatus {
    #[inline]
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        // discriminants are 0..=4
        Self::from(status as u8)
    }
}

impl CgateError {
    /// Create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Reason code for this error
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Policy(e) => policy_reason(e),
            Self::Sandbox(e) => match e {
                SandboxError::Policy(p) => policy_reason(p),
                SandboxError::Crypto(_) => ReasonCode::EncryptionFailure,
                SandboxError::Busy(_) => ReasonCode::SandboxBusy,
                SandboxError::NotFound(_) => ReasonCode::NotFound,
                SandboxError::Io { .. } | SandboxError::Log(_) => ReasonCode::IsolationFailure,
            },
            Self::Security(e) => match e {
                SecurityError::Policy(p) => policy_reason(p),
                SecurityError::Rejected(_) => ReasonCode::PathViolation,
                SecurityError::Io { .. } => ReasonCode::IsolationFailure,
                SecurityError::InvalidPattern { .. } | SecurityError::TableParse(_) => ReasonCode::Configuration,
            },
            Self::Crypto(_) => ReasonCode::EncryptionFailure,
            Self::Scoring(e) => match e {
                ScoringError::ParserInit(_) => ReasonCode::ParseFailure,
                ScoringError::Timeout { .. } => ReasonCode::ExecutionTimeout,
                ScoringError::Runner(_) | ScoringError::Io { .. } => ReasonCode::ExecutionFailure,
                ScoringError::Memory(_) | ScoringError::InvalidRule { .. } => ReasonCode::Configuration,
            },
            Self::Decision(_) | Self::Config(_) => ReasonCode::Configuration,
            Self::UnsafeContent { .. } | Self::NotText(_) => ReasonCode::UnsafeContent,
            Self::NoCandidate(_) => ReasonCode::NotFound,
        }
    }

    /// Human-readable next step
    #[must_use]
    pub fn remediation(&self) -> String {
        match self {
            Self::UnsafeContent { risks, .. } => {
                let mut hints: Vec<&str> = risks.iter().map(SafetyRisk::recommendation).collect();
                hints.dedup();
                hints.join("; ")
            }
            Self::Security(SecurityError::Rejected(reason)) => {
                format!("choose an existing regular file inside the project ({reason})")
            }
            Self::NoCandidate(_) => "write the candidate with `cgate execute` first".to_string(),
            _ => self.reason_code().hint().to_string(),
        }
    }

    /// Exit status for this error
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        self.reason_code().exit_status()
    }
}

impl ReasonCode {
    fn hint(self) -> &'static str {
        match self {
            Self::PathViolation => "use a path relative to the project root that stays inside it",
            Self::PolicyViolation => "use an allowed file type, stay under the size limit, and avoid blocked paths",
            Self::ParseFailure => "fix the syntax errors and re-run",
            Self::ExecutionTimeout => "make the tests faster or raise scoring.test_timeout_ms",
            Self::ExecutionFailure => "check that the test toolchain is installed and runnable",
            Self::SecurityFinding => "remove the flagged constructs",
            Self::EncryptionFailure => "check permissions on the key store under the state directory",
            Self::IsolationFailure => "check permissions and free space in the state directory",
            Self::SandboxBusy => "wait for in-flight operations to finish and retry",
            Self::UnsafeContent => "submit plain text source",
            Self::NotFound => "check the file path",
            Self::Configuration => "fix the configuration file",
        }
    }

    /// Exit status for this reason
    #[must_use]
    pub fn exit_status(self) -> ExitStatus {
        match self {
            Self::PathViolation => ExitStatus::AccessDenied,
            Self::PolicyViolation | Self::SecurityFinding => ExitStatus::PolicyViolation,
            Self::ParseFailure | Self::UnsafeContent | Self::NotFound | Self::Configuration => {
                ExitStatus::ValidationFailure
            }
            Self::ExecutionTimeout
            | Self::ExecutionFailure
            | Self::EncryptionFailure
            | Self::IsolationFailure
            | Self::SandboxBusy => ExitStatus::ExecutionFailure,
        }
    }
}

fn policy_reason(err: &PolicyError) -> ReasonCode {
    if err.is_policy_violation() {
        ReasonCode::PolicyViolation
    } else if err.is_path_violation() || matches!(err, PolicyError::InvalidPath(_)) {
        ReasonCode::PathViolation
    } else {
        ReasonCode::Configuration
    }
}

/// Result alias for cgate operations
pub type Result<T> = std::result::Result<T, CgateError>;
