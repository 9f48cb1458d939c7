//! cgate access policy
//!
//! Decides whether a path may be touched and whether a payload may be written.
//!
//! # Core Concepts
//!
//! - [`ProjectPath`]: normalized, root-relative path
//! - [`AccessPolicy`]: containment, extension allow-list, blocked globs, size ceiling
//! - [`PolicyError`]: fail-closed outcome naming the violated rule
//!
//! # Example
//!
//! ```rust,ignore
//! use cgate_policy::{AccessPolicy, AccessPolicyConfig};
//!
//! let policy = AccessPolicy::new("/work/project", AccessPolicyConfig::default())?;
//! let path = policy.check_write("src/lib.rs", 512)?;
//! assert_eq!(path.to_string(), "src/lib.rs");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod path;
pub mod policy;

pub use error::{PolicyError, PolicyRule};
pub use path::ProjectPath;
pub use policy::{AccessPolicy, AccessPolicyConfig, DEFAULT_MAX_FILE_SIZE};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
