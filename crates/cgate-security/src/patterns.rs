//! Versioned detector tables
//!
//! Detection rules are data, not branches:
//! - [`PatternTable`]: serializable table (TOML), carries a version string
//! - [`CompiledPatterns`]: compiled regexes, shared read-only across evaluations
//!
//! The built-in table ships in `patterns/default.toml`; a project can point
//! its configuration at a replacement file.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SecurityError;

const BUILTIN_TABLE: &str = include_str!("../patterns/default.toml");

/// Secret category used in redaction placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    ApiToken,
    CloudKey,
    DatabaseUrl,
    SignedToken,
    PrivateKey,
    CardNumber,
    Ssn,
    PhoneNumber,
    PrivateIp,
    GenericSecret,
}

impl SecretKind {
    /// Stable tag used in placeholders and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiToken => "api_token",
            Self::CloudKey => "cloud_key",
            Self::DatabaseUrl => "database_url",
            Self::SignedToken => "signed_token",
            Self::PrivateKey => "private_key",
            Self::CardNumber => "card_number",
            Self::Ssn => "ssn",
            Self::PhoneNumber => "phone_number",
            Self::PrivateIp => "private_ip",
            Self::GenericSecret => "generic_secret",
        }
    }

    /// Placeholder that replaces a redacted value
    #[must_use]
    pub fn placeholder(self) -> String {
        format!("[REDACTED:{}]", self.as_str())
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malicious construct category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaliciousCategory {
    DynamicEval,
    DestructiveFs,
    ProcessSpawn,
    PrototypeMutation,
    OutboundRequest,
    SqlInjection,
}

impl MaliciousCategory {
    /// Stable tag used in findings and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DynamicEval => "dynamic_eval",
            Self::DestructiveFs => "destructive_fs",
            Self::ProcessSpawn => "process_spawn",
            Self::PrototypeMutation => "prototype_mutation",
            Self::OutboundRequest => "outbound_request",
            Self::SqlInjection => "sql_injection",
        }
    }
}

impl fmt::Display for MaliciousCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-match validator for sensitive patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// Digits must pass the Luhn checksum
    Luhn,
}

impl Validator {
    fn accepts(self, text: &str) -> bool {
        match self {
            Self::Luhn => luhn_valid(text),
        }
    }
}

/// Sensitive-data rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivePatternDef {
    pub id: String,
    pub kind: SecretKind,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Validator>,
}

/// Malicious-construct rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaliciousPatternDef {
    pub id: String,
    pub category: MaliciousCategory,
    pub pattern: String,
    /// Matches whose `host` group (or whole text) matches this are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
}

/// Serializable detector table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternTable {
    pub version: String,
    #[serde(default)]
    pub sensitive: Vec<SensitivePatternDef>,
    #[serde(default)]
    pub malicious: Vec<MaliciousPatternDef>,
}

impl PatternTable {
    /// Built-in table
    ///
    /// # Errors
    /// Only if the embedded table is malformed.
    pub fn builtin() -> Result<Self, SecurityError> {
        Self::from_toml_str(BUILTIN_TABLE)
    }

    /// Parse a table from TOML
    ///
    /// # Errors
    /// [`SecurityError::TableParse`] on malformed input.
    pub fn from_toml_str(source: &str) -> Result<Self, SecurityError> {
        toml::from_str(source).map_err(|e| SecurityError::TableParse(e.to_string()))
    }

    /// Load a table from a TOML file
    ///
    /// # Errors
    /// IO or parse failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SecurityError> {
        let path = path.as_ref();
        let source =
            std::fs::read_to_string(path).map_err(|e| SecurityError::io_error(path, e))?;
        let table = Self::from_toml_str(&source)?;
        tracing::info!(path = %path.display(), version = %table.version, "pattern table loaded");
        Ok(table)
    }

    /// Compile every rule
    ///
    /// # Errors
    /// [`SecurityError::InvalidPattern`] naming the first rule that fails.
    pub fn compile(&self) -> Result<CompiledPatterns, SecurityError> {
        let sensitive = self
            .sensitive
            .iter()
            .map(|def| {
                Ok(SensitiveRule {
                    id: def.id.clone(),
                    kind: def.kind,
                    regex: compile(&def.id, &def.pattern)?,
                    validator: def.validator,
                })
            })
            .collect::<Result<Vec<_>, SecurityError>>()?;

        let malicious = self
            .malicious
            .iter()
            .map(|def| {
                Ok(MaliciousRule {
                    id: def.id.clone(),
                    category: def.category,
                    regex: compile(&def.id, &def.pattern)?,
                    exclude: def
                        .exclude
                        .as_deref()
                        .map(|p| compile(&def.id, p))
                        .transpose()?,
                })
            })
            .collect::<Result<Vec<_>, SecurityError>>()?;

        Ok(CompiledPatterns {
            version: self.version.clone(),
            sensitive,
            malicious,
        })
    }
}

fn compile(id: &str, pattern: &str) -> Result<Regex, SecurityError> {
    Regex::new(pattern).map_err(|e| SecurityError::invalid_pattern(id, e.to_string()))
}

#[derive(Debug, Clone)]
pub(crate) struct SensitiveRule {
    pub(crate) id: String,
    pub(crate) kind: SecretKind,
    regex: Regex,
    validator: Option<Validator>,
}

#[derive(Debug, Clone)]
pub(crate) struct MaliciousRule {
    pub(crate) id: String,
    pub(crate) category: MaliciousCategory,
    regex: Regex,
    exclude: Option<Regex>,
}

/// One raw match before overlap resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawMatch {
    pub(crate) rule: usize,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// Compiled detector table
#[derive(Debug, Clone)]
pub struct CompiledPatterns {
    version: String,
    sensitive: Vec<SensitiveRule>,
    malicious: Vec<MaliciousRule>,
}

impl CompiledPatterns {
    /// Compile the built-in table
    ///
    /// # Errors
    /// Only if the embedded table is malformed.
    pub fn builtin() -> Result<Self, SecurityError> {
        PatternTable::builtin()?.compile()
    }

    /// Table version
    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of sensitive and malicious rules
    #[inline]
    #[must_use]
    pub fn rule_counts(&self) -> (usize, usize) {
        (self.sensitive.len(), self.malicious.len())
    }

    pub(crate) fn sensitive_rule(&self, idx: usize) -> &SensitiveRule {
        &self.sensitive[idx]
    }

    pub(crate) fn malicious_rule(&self, idx: usize) -> &MaliciousRule {
        &self.malicious[idx]
    }

    /// All sensitive matches in table order, validators applied
    pub(crate) fn sensitive_matches(&self, content: &str) -> Vec<RawMatch> {
        let mut out = Vec::new();
        for (rule_idx, rule) in self.sensitive.iter().enumerate() {
            for caps in rule.regex.captures_iter(content) {
                let Some(span) = caps.name("secret").or_else(|| caps.get(0)) else {
                    continue;
                };
                if span.start() == span.end() {
                    continue;
                }
                if let Some(validator) = rule.validator {
                    if !validator.accepts(span.as_str()) {
                        continue;
                    }
                }
                out.push(RawMatch {
                    rule: rule_idx,
                    start: span.start(),
                    end: span.end(),
                });
            }
        }
        out
    }

    /// All malicious matches in table order, exclusions applied
    pub(crate) fn malicious_matches(&self, content: &str) -> Vec<RawMatch> {
        let mut out = Vec::new();
        for (rule_idx, rule) in self.malicious.iter().enumerate() {
            for caps in rule.regex.captures_iter(content) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                if let Some(exclude) = &rule.exclude {
                    let host = caps.name("host").unwrap_or(whole).as_str();
                    if exclude.is_match(host) {
                        continue;
                    }
                }
                out.push(RawMatch {
                    rule: rule_idx,
                    start: whole.start(),
                    end: whole.end(),
                });
            }
        }
        out
    }
}

fn luhn_valid(text: &str) -> bool {
    let digits: Vec<u32> = text.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
