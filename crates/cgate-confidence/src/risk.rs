//! Risk indicators

use cgate_policy::ProjectPath;
use serde::{Deserialize, Serialize};

const MANIFESTS: &[&str] = &[
    "cargo.toml",
    "cargo.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "requirements.txt",
    "pyproject.toml",
    "pipfile",
    "pipfile.lock",
    "poetry.lock",
    "setup.py",
    "setup.cfg",
    "go.mod",
    "go.sum",
    "gemfile",
    "gemfile.lock",
    "composer.json",
    "composer.lock",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
];

/// Whether `path` names a dependency manifest or lockfile
#[must_use]
pub fn is_dependency_manifest(path: &ProjectPath) -> bool {
    let name = path.file_name().to_ascii_lowercase();
    MANIFESTS.contains(&name.as_str()) || (name.starts_with("requirements") && name.ends_with(".txt"))
}

/// Risk categories detected for a candidate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskIndicators {
    /// Exported symbols removed relative to the real-tree original
    pub breaking_changes: Vec<String>,
    pub security_finding: bool,
    pub sensitive_data: bool,
    pub performance_regression: bool,
    pub dependency_change: bool,
}

impl RiskIndicators {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Human-readable description of every detected risk
    #[must_use]
    pub fn descriptions(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.breaking_changes.is_empty() {
            out.push(format!("removes exported symbols: {}", self.breaking_changes.join(", ")));
        }
        if self.security_finding {
            out.push("contains malicious-pattern findings".to_string());
        }
        if self.sensitive_data {
            out.push("contained sensitive data (redacted and sealed)".to_string());
        }
        if self.performance_regression {
            out.push("adds performance anti-patterns relative to the current file".to_string());
        }
        if self.dependency_change {
            out.push("changes a dependency manifest".to_string());
        }
        out
    }
}
