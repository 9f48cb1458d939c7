//! cgate content security pipeline
//!
//! Screens candidate content before it reaches persistent storage or
//! scoring.
//!
//! # Core Concepts
//!
//! - [`PatternTable`] / [`CompiledPatterns`]: versioned, loadable detector tables
//! - [`sanitize`]: redact secrets, annotate malicious constructs
//! - [`validate_safety`]: size, binary, and repetition heuristics
//! - [`validate_file_path`] / [`scan_file`]: checks for existing project files
//! - [`ContentCipher`]: authenticated sealing with a project-local master key

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod files;
pub mod patterns;
pub mod safety;
pub mod sanitizer;

pub use config::SecurityConfig;
pub use crypto::{
    is_sealed, ContentCipher, EncryptedPayload, KeyStore, MasterKey, ALGORITHM,
    DEFAULT_KDF_ITERATIONS, SEALED_PREFIX,
};
pub use error::{CryptoError, SecurityError};
pub use files::{scan_file, validate_file_path, PathRejection, PathValidation, ScanReport};
pub use patterns::{CompiledPatterns, MaliciousCategory, PatternTable, SecretKind};
pub use safety::{validate_safety, SafetyLimits, SafetyReport, SafetyRisk};
pub use sanitizer::{sanitize, Finding, FindingKind, SanitizationResult};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
