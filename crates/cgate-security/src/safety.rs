//! Content safety heuristics
//!
//! Independent of secret and malicious detection: these catch corrupt or
//! adversarially generated input.
//! - Oversized content
//! - Binary-looking content (control bytes, invalid UTF-8)
//! - Pathological line repetition

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Thresholds for [`validate_safety`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    /// Maximum content size in bytes
    pub max_content_size: usize,
    /// Maximum share of control bytes before content counts as binary
    pub max_binary_ratio: f64,
    /// Minimum share of distinct lines once `repetition_min_lines` is reached
    pub min_unique_line_ratio: f64,
    /// Line count below which repetition is not judged
    pub repetition_min_lines: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_content_size: 1024 * 1024,
            max_binary_ratio: 0.05,
            min_unique_line_ratio: 0.1,
            repetition_min_lines: 20,
        }
    }
}

impl SafetyLimits {
    /// With size ceiling
    #[inline]
    #[must_use]
    pub fn with_max_content_size(mut self, max: usize) -> Self {
        self.max_content_size = max;
        self
    }
}

/// Detected safety risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "risk", rename_all = "snake_case")]
pub enum SafetyRisk {
    Oversized { size: usize, max: usize },
    Binary { control_ratio: f64 },
    InvalidUtf8,
    Repetitive { lines: usize, unique_ratio: f64 },
}

impl SafetyRisk {
    /// Remediation for this risk
    #[must_use]
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Oversized { .. } => "reduce file size or split the change into smaller files",
            Self::Binary { .. } | Self::InvalidUtf8 => {
                "submit text source only; binary content cannot be evaluated"
            }
            Self::Repetitive { .. } => {
                "remove duplicated lines; the content looks machine-generated or corrupt"
            }
        }
    }
}

impl fmt::Display for SafetyRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oversized { size, max } => write!(f, "content is {size} bytes, limit is {max}"),
            Self::Binary { control_ratio } => {
                write!(f, "content looks binary ({:.1}% control bytes)", control_ratio * 100.0)
            }
            Self::InvalidUtf8 => write!(f, "content is not valid UTF-8"),
            Self::Repetitive { lines, unique_ratio } => write!(
                f,
                "{lines} lines with only {:.1}% distinct",
                unique_ratio * 100.0
            ),
        }
    }
}

/// Outcome of [`validate_safety`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub is_safe: bool,
    pub risks: Vec<SafetyRisk>,
    pub recommendations: Vec<String>,
}

/// Check content against safety heuristics
#[must_use]
pub fn validate_safety(content: &[u8], limits: &SafetyLimits) -> SafetyReport {
    let mut risks = Vec::new();

    if content.len() > limits.max_content_size {
        risks.push(SafetyRisk::Oversized {
            size: content.len(),
            max: limits.max_content_size,
        });
    }

    let ratio = control_ratio(content);
    if ratio > limits.max_binary_ratio {
        risks.push(SafetyRisk::Binary {
            control_ratio: ratio,
        });
    }

    match std::str::from_utf8(content) {
        Ok(text) => {
            if let Some(risk) = repetition_risk(text, limits) {
                risks.push(risk);
            }
        }
        Err(_) => {
            if !risks.iter().any(|r| matches!(r, SafetyRisk::Binary { .. })) {
                risks.push(SafetyRisk::InvalidUtf8);
            }
        }
    }

    let mut recommendations: Vec<String> = Vec::new();
    for risk in &risks {
        let rec = risk.recommendation().to_string();
        if !recommendations.contains(&rec) {
            recommendations.push(rec);
        }
    }

    SafetyReport {
        is_safe: risks.is_empty(),
        risks,
        recommendations,
    }
}

#[allow(clippy::cast_precision_loss)]
fn control_ratio(content: &[u8]) -> f64 {
    if content.is_empty() {
        return 0.0;
    }
    let control = content
        .iter()
        .filter(|&&b| b == 0 || b == 0x7f || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')))
        .count();
    control as f64 / content.len() as f64
}

/// Near-duplicate lines: whitespace collapsed, case folded
#[allow(clippy::cast_precision_loss)]
fn repetition_risk(text: &str, limits: &SafetyLimits) -> Option<SafetyRisk> {
    let lines: Vec<String> = text
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < limits.repetition_min_lines {
        return None;
    }
    let unique: HashSet<&str> = lines.iter().map(String::as_str).collect();
    let unique_ratio = unique.len() as f64 / lines.len() as f64;
    (unique_ratio < limits.min_unique_line_ratio).then_some(SafetyRisk::Repetitive {
        lines: lines.len(),
        unique_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_source_is_safe() {
        let content = b"fn main() {\n    println!(\"hi\");\n}\n";
        let report = validate_safety(content, &SafetyLimits::default());
        assert!(report.is_safe);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn oversized_rejected() {
        let limits = SafetyLimits::default().with_max_content_size(8);
        let report = validate_safety(b"0123456789", &limits);
        assert!(!report.is_safe);
        assert!(matches!(report.risks[0], SafetyRisk::Oversized { size: 10, max: 8 }));
    }

    #[test]
    fn binary_rejected() {
        let mut content = b"ELF".to_vec();
        content.extend(std::iter::repeat(0u8).take(64));
        let report = validate_safety(&content, &SafetyLimits::default());
        assert!(!report.is_safe);
        assert!(report.risks.iter().any(|r| matches!(r, SafetyRisk::Binary { .. })));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let report = validate_safety(&[0xff, 0xfe, b'a', b'b'], &SafetyLimits::default());
        assert_eq!(report.risks, vec![SafetyRisk::InvalidUtf8]);
    }

    #[test]
    fn repetition_rejected() {
        let content = "console.log('x');\n".repeat(50);
        let report = validate_safety(content.as_bytes(), &SafetyLimits::default());
        assert!(!report.is_safe);
        assert!(matches!(report.risks[0], SafetyRisk::Repetitive { lines: 50, .. }));
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn short_repetition_tolerated() {
        let content = "}\n".repeat(10);
        let report = validate_safety(content.as_bytes(), &SafetyLimits::default());
        assert!(report.is_safe);
    }
}
