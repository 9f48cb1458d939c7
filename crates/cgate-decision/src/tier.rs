//! Deployment tiers and their thresholds

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecisionError;

/// Action class for a scored candidate, least to most trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentTier {
    /// Keep working in the sandbox
    Blocked,
    /// Close; keep iterating in the sandbox
    SandboxOnly,
    /// Needs a human decision
    ReviewRequired,
    /// May be written to the project tree
    AutoDeploy,
}

impl DeploymentTier {
    /// Check if this tier permits writing to the project tree
    #[inline]
    #[must_use]
    pub fn allows_deploy(self) -> bool {
        self == Self::AutoDeploy
    }

    /// Check if this tier asks for a human
    #[inline]
    #[must_use]
    pub fn requires_review(self) -> bool {
        self == Self::ReviewRequired
    }

    /// Check if the candidate stays in the sandbox
    #[inline]
    #[must_use]
    pub fn stays_in_sandbox(self) -> bool {
        matches!(self, Self::Blocked | Self::SandboxOnly)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::SandboxOnly => "sandbox_only",
            Self::ReviewRequired => "review_required",
            Self::AutoDeploy => "auto_deploy",
        }
    }
}

impl fmt::Display for DeploymentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of each tier above [`DeploymentTier::Blocked`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    pub sandbox_only: u8,
    pub review: u8,
    pub auto_deploy: u8,
    /// Similar history entries included in a review package
    pub review_history: usize,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            sandbox_only: 50,
            review: 70,
            auto_deploy: 95,
            review_history: 5,
        }
    }
}

impl GateThresholds {
    /// Check bounds are ordered and within 0-100
    ///
    /// # Errors
    /// [`DecisionError::InvalidThresholds`] describing the first problem.
    pub fn validate(&self) -> Result<(), DecisionError> {
        if self.auto_deploy > 100 {
            return Err(DecisionError::InvalidThresholds(format!(
                "auto_deploy {} exceeds 100",
                self.auto_deploy
            )));
        }
        if !(self.sandbox_only <= self.review && self.review <= self.auto_deploy) {
            return Err(DecisionError::InvalidThresholds(format!(
                "expected sandbox_only <= review <= auto_deploy, got {} / {} / {}",
                self.sandbox_only, self.review, self.auto_deploy
            )));
        }
        Ok(())
    }

    /// Tier for a score, before any security override
    #[must_use]
    pub fn tier_for(&self, score: u8) -> DeploymentTier {
        if score >= self.auto_deploy {
            DeploymentTier::AutoDeploy
        } else if score >= self.review {
            DeploymentTier::ReviewRequired
        } else if score >= self.sandbox_only {
            DeploymentTier::SandboxOnly
        } else {
            DeploymentTier::Blocked
        }
    }
}
