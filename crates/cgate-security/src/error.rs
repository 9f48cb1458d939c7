//! Error types for the content security pipeline
//!
//! - [`SecurityError`]: pattern tables, file scanning, unsafe content
//! - [`CryptoError`]: key material and sealing; never falls back to plaintext

use std::path::PathBuf;

use cgate_policy::PolicyError;

/// Errors raised while screening content
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// Pattern in a table does not compile
    #[error("pattern '{id}' is invalid: {message}")]
    InvalidPattern { id: String, message: String },

    /// Pattern table could not be parsed
    #[error("pattern table parse error: {0}")]
    TableParse(String),

    /// IO error reading a table or scanned file
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scanned file failed path validation
    #[error("file rejected: {0}")]
    Rejected(String),

    /// Path or policy check failed
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl SecurityError {
    /// Create invalid pattern error
    pub fn invalid_pattern(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by sealing and key management
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key file could not be read, written, or permissioned
    #[error("key store error at {path}: {source}")]
    KeyStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key file content is not a 32-byte hex secret
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// OS random source failed
    #[error("random source unavailable: {0}")]
    Random(String),

    /// AEAD encryption failed
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// AEAD decryption failed (wrong key or tampered data)
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Sealed envelope is malformed or has an unknown version
    #[error("malformed envelope: {0}")]
    Envelope(String),
}

impl CryptoError {
    /// Create key store error for path
    pub fn key_store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::KeyStore {
            path: path.into(),
            source,
        }
    }
}
