//! Error types for access-policy checks
//!
//! Two outcomes are fail-closed and carry machine-checkable detail:
//! - [`PolicyError::PathViolation`]: traversal or resolution outside the root
//! - [`PolicyError::PolicyViolation`]: extension, size, or blocked-pattern rule

use std::fmt;
use std::path::PathBuf;

/// Rule that rejected a path or payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRule {
    /// Extension not on the allow-list
    DisallowedExtension(String),
    /// File has no extension and its name is not allow-listed
    MissingExtension,
    /// Content or file exceeds the size ceiling
    FileTooLarge { size: u64, max: u64 },
    /// Path matches a blocked glob pattern
    BlockedPath(String),
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisallowedExtension(ext) => write!(f, "extension '.{ext}' is not allowed"),
            Self::MissingExtension => write!(f, "files without an extension are not allowed"),
            Self::FileTooLarge { size, max } => {
                write!(f, "size {size} bytes exceeds the {max} byte limit")
            }
            Self::BlockedPath(pattern) => write!(f, "path matches blocked pattern '{pattern}'"),
        }
    }
}

/// Errors raised by the access policy
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Path escapes the project root (traversal, absolute path, symlink)
    #[error("path violation for '{path}': {reason}")]
    PathViolation { path: String, reason: String },

    /// Path or payload breaks a configured rule
    #[error("policy violation for '{path}': {rule}")]
    PolicyViolation { path: String, rule: PolicyRule },

    /// Path is syntactically unusable
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Blocked-pattern glob failed to compile
    #[error("invalid blocked pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Project root does not exist or cannot be canonicalized
    #[error("project root {path} is unavailable: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PolicyError {
    /// Create path violation
    pub fn path_violation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create policy violation
    pub fn policy_violation(path: impl Into<String>, rule: PolicyRule) -> Self {
        Self::PolicyViolation {
            path: path.into(),
            rule,
        }
    }

    /// Check whether this is a containment failure
    #[inline]
    #[must_use]
    pub fn is_path_violation(&self) -> bool {
        matches!(self, Self::PathViolation { .. })
    }

    /// Check whether this is a configured-rule failure
    #[inline]
    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_violation_display() {
        let err = PolicyError::path_violation("../x", "traverses above the project root");
        assert_eq!(
            err.to_string(),
            "path violation for '../x': traverses above the project root"
        );
        assert!(err.is_path_violation());
        assert!(!err.is_policy_violation());
    }

    #[test]
    fn policy_violation_display() {
        let err = PolicyError::policy_violation(
            "big.rs",
            PolicyRule::FileTooLarge { size: 20, max: 10 },
        );
        assert!(err.to_string().contains("exceeds the 10 byte limit"));
        assert!(err.is_policy_violation());
    }
}
