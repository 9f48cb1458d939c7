//! Ranked remediation suggestions

use cgate_confidence::{ConfidenceMetrics, MetricKind, RiskIndicators};
use cgate_security::MaliciousCategory;
use serde::{Deserialize, Serialize};

/// One actionable next step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Metric this addresses, if any
    pub metric: Option<MetricKind>,
    /// Points the metric is below its maximum
    pub shortfall: u8,
    pub action: String,
}

impl Suggestion {
    #[must_use]
    pub fn new(metric: Option<MetricKind>, shortfall: u8, action: impl Into<String>) -> Self {
        Self {
            metric,
            shortfall,
            action: action.into(),
        }
    }
}

/// Suggestions, most urgent first
///
/// Security findings lead; then metrics ordered by how far below their
/// maximum they fall, relative to the maximum.
#[must_use]
pub fn rank_suggestions(
    metrics: &ConfidenceMetrics,
    risks: &RiskIndicators,
    malicious: &[MaliciousCategory],
) -> Vec<Suggestion> {
    let mut out = Vec::new();
    if !malicious.is_empty() {
        let names: Vec<&str> = malicious.iter().map(|c| c.as_str()).collect();
        out.push(Suggestion::new(
            Some(MetricKind::RiskAssessment),
            MetricKind::RiskAssessment.max() - metrics.get(MetricKind::RiskAssessment),
            format!("remove flagged constructs ({})", names.join(", ")),
        ));
    }
    for kind in metrics.weakest() {
        let shortfall = kind.max() - metrics.get(kind);
        for action in remediation(kind, metrics.get(kind), risks) {
            if out.iter().any(|s| s.action == action) {
                continue;
            }
            out.push(Suggestion::new(Some(kind), shortfall, action));
        }
    }
    out
}

fn remediation(kind: MetricKind, score: u8, risks: &RiskIndicators) -> Vec<String> {
    match kind {
        MetricKind::SyntaxValidation if score == 0 => {
            vec!["content is empty or could not be parsed; provide a complete file".into()]
        }
        MetricKind::SyntaxValidation if score == 10 => {
            vec!["use a file type with syntax checking, or review syntax manually".into()]
        }
        MetricKind::SyntaxValidation => vec!["fix the syntax errors reported by the parser".into()],
        MetricKind::TestExecution if score == 12 => vec!["add tests for this file".into()],
        MetricKind::TestExecution if score == 0 => {
            vec!["tests failed, timed out, or could not run; fix them and re-run".into()]
        }
        MetricKind::TestExecution => vec!["fix the failing tests".into()],
        MetricKind::PatternAlignment => {
            vec!["follow the project's established module, naming, and formatting conventions".into()]
        }
        MetricKind::MemoryConsistency => {
            vec!["revisit approaches this project previously rejected or reverted".into()]
        }
        MetricKind::RiskAssessment => risk_actions(risks),
        MetricKind::PerformanceImpact => {
            vec!["remove blocking calls, unbounded loops, and oversized allocations".into()]
        }
    }
}

fn risk_actions(risks: &RiskIndicators) -> Vec<String> {
    let mut out = Vec::new();
    if !risks.breaking_changes.is_empty() {
        out.push(format!(
            "restore removed exports or update their callers: {}",
            risks.breaking_changes.join(", ")
        ));
    }
    if risks.sensitive_data {
        out.push("remove the detected secret and load it from configuration".to_string());
    }
    if risks.performance_regression {
        out.push("avoid introducing performance anti-patterns into an existing file".to_string());
    }
    if risks.dependency_change {
        out.push("submit dependency manifest changes for separate review".to_string());
    }
    out
}
