//! cgate deployment decision gate
//!
//! Maps a confidence score and security findings to an allowed action.
//!
//! # Core Concepts
//!
//! - [`DeploymentTier`]: Blocked < SandboxOnly < ReviewRequired < AutoDeploy
//! - [`GateThresholds`]: lower bound of each tier (50 / 70 / 95 by default)
//! - [`DeploymentGate::decide`]: pure decision with the security override
//! - [`ReviewPackage`] / [`Suggestion`]: what a reviewer or author acts on

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod gate;
pub mod suggestions;
pub mod tier;

pub use error::DecisionError;
pub use gate::{DecisionDetail, DecisionInput, DeploymentDecision, DeploymentGate, ReviewPackage};
pub use suggestions::{rank_suggestions, Suggestion};
pub use tier::{DeploymentTier, GateThresholds};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
