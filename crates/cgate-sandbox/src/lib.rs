//! cgate sandbox isolation layer
//!
//! Candidate content is evaluated in a mirror of the project; the real tree
//! is only written through the gated promotion path.
//!
//! # Core Concepts
//!
//! - [`Sandbox`]: mirror lifecycle, mediated reads and writes, promotion
//! - [`OperationLog`]: append-only, hash-chained record of every operation
//! - [`ContentDigest`]: BLAKE3 digest used in place of content in logs and caches

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod digest;
pub mod error;
pub mod oplog;
pub mod sandbox;

pub use digest::{ContentDigest, DigestError};
pub use error::SandboxError;
pub use oplog::{OperationEntry, OperationKind, OperationLog, OperationRecord, DEFAULT_RETAINED_RECORDS};
pub use sandbox::{FileRead, ReadSource, Sandbox, SandboxConfig, WriteReceipt};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
