//! Project configuration
//!
//! Read from `<project>/.cgate/config.toml`; every section and field is
//! optional and falls back to its default.

use std::path::Path;

use cgate_confidence::ScoringConfig;
use cgate_decision::GateThresholds;
use cgate_policy::AccessPolicyConfig;
use cgate_sandbox::SandboxConfig;
use cgate_security::SecurityConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CgateError, Result};

/// Configuration for one project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgateConfig {
    pub policy: AccessPolicyConfig,
    pub security: SecurityConfig,
    pub scoring: ScoringConfig,
    pub gate: GateThresholds,
    pub sandbox: SandboxConfig,
}

impl CgateConfig {
    /// Config file name inside the default state directory
    pub const FILE_NAME: &'static str = "config.toml";

    /// Parse from TOML source
    ///
    /// # Errors
    /// [`CgateError::Config`] on malformed TOML or invalid thresholds.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| CgateError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<root>/.cgate/config.toml`, or defaults if absent
    ///
    /// # Errors
    /// [`CgateError::Config`] if the file exists but cannot be read or parsed.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let path = root
            .as_ref()
            .join(&SandboxConfig::default().state_dir)
            .join(Self::FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::from_toml_str(&source)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CgateError::config(format!("{}: {e}", path.display()))),
        }
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// [`CgateError::Config`] naming the first problem.
    pub fn validate(&self) -> Result<()> {
        self.gate
            .validate()
            .map_err(|e| CgateError::config(e.to_string()))?;
        if self.sandbox.state_dir.is_empty() || self.sandbox.state_dir.contains(['/', '\\']) {
            return Err(CgateError::config(format!(
                "sandbox.state_dir must be a single directory name, got '{}'",
                self.sandbox.state_dir
            )));
        }
        if self.policy.max_file_size == 0 {
            return Err(CgateError::config("policy.max_file_size must be positive"));
        }
        Ok(())
    }

    /// Policy with the state directory always blocked
    #[must_use]
    pub fn effective_policy(&self) -> AccessPolicyConfig {
        self.policy
            .clone()
            .with_blocked_pattern(format!("{}/**", self.sandbox.state_dir))
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AccessPolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: GateThresholds) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }
}
