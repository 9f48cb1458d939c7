//! cgate: confidence-gated sandbox
//!
//! Generated code changes are evaluated in an isolated mirror of the
//! project and promoted into the real tree only when the evidence says so.
//!
//! # Core Concepts
//!
//! - [`ConfidenceSandbox`]: the command surface (`execute`, `run_tests`,
//!   `get_confidence`, `check_deployment_permission`, `deploy`, `clean`, `reset`)
//! - [`CgateConfig`]: per-project configuration from `.cgate/config.toml`
//! - [`CgateError`]: every rejection with a [`ReasonCode`], remediation and [`ExitStatus`]
//! - [`ScheduledTask`]: caller-owned periodic rescans
//!
//! # Example
//!
//! ```rust,ignore
//! use cgate_core::ConfidenceSandbox;
//!
//! let gate = ConfidenceSandbox::open_project("/work/project").await?;
//! let outcome = gate.execute("src/login.ts", &generated).await?;
//! if outcome.decision.allows_deploy() {
//!     gate.deploy("src/login.ts", false).await?;
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod gated;
pub mod schedule;

pub use config::CgateConfig;
pub use error::{CgateError, ExitStatus, ReasonCode, Result};
pub use gated::{CommandOutcome, ConfidenceReport, ConfidenceSandbox, DeployOutcome};
pub use schedule::ScheduledTask;

pub use cgate_confidence as confidence;
pub use cgate_decision as decision;
pub use cgate_policy as policy;
pub use cgate_sandbox as sandbox;
pub use cgate_security as security;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
