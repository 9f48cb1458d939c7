//! Performance heuristics
//!
//! Versioned, regex-driven rule table. Loadable from TOML like the
//! security pattern tables.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;
use crate::language::SourceLanguage;

const BUILTIN_RULES: &str = include_str!("../rules/performance.toml");

/// One performance rule as written in the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRuleDef {
    pub id: String,
    pub pattern: String,
    pub penalty: u8,
    #[serde(default)]
    pub description: String,
    /// Empty means every language
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<SourceLanguage>,
}

/// Serializable rule table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRuleTable {
    pub version: String,
    #[serde(default)]
    pub rules: Vec<PerformanceRuleDef>,
}

impl PerformanceRuleTable {
    /// Parse a table from TOML
    ///
    /// # Errors
    /// [`ScoringError::InvalidRule`] on malformed input.
    pub fn from_toml_str(source: &str) -> Result<Self, ScoringError> {
        toml::from_str(source).map_err(|e| ScoringError::InvalidRule {
            id: "<table>".into(),
            message: e.to_string(),
        })
    }

    /// Load a table from a TOML file
    ///
    /// # Errors
    /// IO or parse failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScoringError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ScoringError::io_error(path, e))?;
        Self::from_toml_str(&source)
    }

    /// Compile every rule
    ///
    /// # Errors
    /// [`ScoringError::InvalidRule`] naming the first rule that fails.
    pub fn compile(&self) -> Result<PerformanceRules, ScoringError> {
        let rules = self
            .rules
            .iter()
            .map(|def| {
                let regex = Regex::new(&def.pattern).map_err(|e| ScoringError::InvalidRule {
                    id: def.id.clone(),
                    message: e.to_string(),
                })?;
                Ok(CompiledRule {
                    def: def.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, ScoringError>>()?;
        Ok(PerformanceRules {
            version: self.version.clone(),
            rules,
        })
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    def: PerformanceRuleDef,
    regex: Regex,
}

impl CompiledRule {
    fn applies_to(&self, language: Option<SourceLanguage>) -> bool {
        self.def.languages.is_empty() || language.is_some_and(|l| self.def.languages.contains(&l))
    }
}

/// A rule that matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceHit {
    pub rule_id: String,
    pub penalty: u8,
    pub description: String,
}

/// Compiled rule table
#[derive(Debug, Clone)]
pub struct PerformanceRules {
    version: String,
    rules: Vec<CompiledRule>,
}

impl PerformanceRules {
    /// Compile the built-in table
    ///
    /// # Errors
    /// Only if the embedded table is malformed.
    pub fn builtin() -> Result<Self, ScoringError> {
        PerformanceRuleTable::from_toml_str(BUILTIN_RULES)?.compile()
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules matching `content`, once each, in table order
    #[must_use]
    pub fn evaluate(&self, content: &str, language: Option<SourceLanguage>) -> Vec<PerformanceHit> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(language) && rule.regex.is_match(content))
            .map(|rule| PerformanceHit {
                rule_id: rule.def.id.clone(),
                penalty: rule.def.penalty,
                description: rule.def.description.clone(),
            })
            .collect()
    }
}

/// Sum of penalties over distinct rules
#[must_use]
pub fn total_penalty(hits: &[PerformanceHit]) -> u32 {
    hits.iter().map(|h| u32::from(h.penalty)).sum()
}
