//! Security pipeline configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KDF_ITERATIONS;
use crate::error::SecurityError;
use crate::patterns::{CompiledPatterns, PatternTable};
use crate::safety::SafetyLimits;

/// Security section of the project configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Replacement pattern table; relative paths resolve against the project root
    pub pattern_table: Option<PathBuf>,
    pub limits: SafetyLimits,
    pub kdf_iterations: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pattern_table: None,
            limits: SafetyLimits::default(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl SecurityConfig {
    /// With external pattern table
    #[must_use]
    pub fn with_pattern_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.pattern_table = Some(path.into());
        self
    }

    /// With KDF iteration count
    #[inline]
    #[must_use]
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Load and compile the configured table, or the built-in one
    ///
    /// # Errors
    /// Table IO, parse, or compile failure.
    pub fn compile_patterns(&self, root: &Path) -> Result<CompiledPatterns, SecurityError> {
        let table = match &self.pattern_table {
            Some(path) if path.is_absolute() => PatternTable::load(path)?,
            Some(path) => PatternTable::load(root.join(path))?,
            None => PatternTable::builtin()?,
        };
        table.compile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_builtin_table() {
        let config = SecurityConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let compiled = config.compile_patterns(dir.path()).unwrap();
        assert_eq!(compiled.version(), PatternTable::builtin().unwrap().version);
    }

    #[test]
    fn relative_table_resolves_against_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rules.toml"),
            "version = \"local-3\"\n[[malicious]]\nid = \"x\"\ncategory = \"dynamic_eval\"\npattern = \"danger\"\n",
        )
        .unwrap();
        let config = SecurityConfig::default().with_pattern_table("rules.toml");
        let compiled = config.compile_patterns(dir.path()).unwrap();
        assert_eq!(compiled.version(), "local-3");
        assert_eq!(compiled.rule_counts(), (0, 1));
    }
}
