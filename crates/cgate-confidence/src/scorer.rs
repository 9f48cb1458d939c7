//! Confidence scoring
//!
//! Pure arithmetic over [`Evidence`]. Sub-score ranges:
//!
//! | metric | range |
//! |---|---|
//! | syntax validation | 0-20 |
//! | test execution | 0-25 |
//! | pattern alignment | 0-20 |
//! | memory consistency | 0-15 |
//! | risk assessment | 0-10 |
//! | performance impact | 0-10 |

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::evidence::{Evidence, TestOutcome};
use crate::perf::total_penalty;
use crate::risk::RiskIndicators;
use crate::signals::PatternSummary;
use crate::syntax::SyntaxOutcome;

/// One of the six sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    SyntaxValidation,
    TestExecution,
    PatternAlignment,
    MemoryConsistency,
    RiskAssessment,
    PerformanceImpact,
}

impl MetricKind {
    pub const ALL: [Self; 6] = [
        Self::SyntaxValidation,
        Self::TestExecution,
        Self::PatternAlignment,
        Self::MemoryConsistency,
        Self::RiskAssessment,
        Self::PerformanceImpact,
    ];

    /// Upper bound of this sub-score
    #[inline]
    #[must_use]
    pub fn max(self) -> u8 {
        match self {
            Self::SyntaxValidation | Self::PatternAlignment => 20,
            Self::TestExecution => 25,
            Self::MemoryConsistency => 15,
            Self::RiskAssessment | Self::PerformanceImpact => 10,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::SyntaxValidation => "syntax validation",
            Self::TestExecution => "test execution",
            Self::PatternAlignment => "pattern alignment",
            Self::MemoryConsistency => "memory consistency",
            Self::RiskAssessment => "risk assessment",
            Self::PerformanceImpact => "performance impact",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Deserialize)]
struct MetricsRepr {
    syntax_validation: u8,
    test_execution: u8,
    pattern_alignment: u8,
    memory_consistency: u8,
    risk_assessment: u8,
    performance_impact: u8,
}

impl From<MetricsRepr> for ConfidenceMetrics {
    fn from(r: MetricsRepr) -> Self {
        Self::new([
            r.syntax_validation,
            r.test_execution,
            r.pattern_alignment,
            r.memory_consistency,
            r.risk_assessment,
            r.performance_impact,
        ])
    }
}

/// Six clamped sub-scores
///
/// Each value is within its [`MetricKind::max`]; deserialization clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "MetricsRepr")]
pub struct ConfidenceMetrics {
    syntax_validation: u8,
    test_execution: u8,
    pattern_alignment: u8,
    memory_consistency: u8,
    risk_assessment: u8,
    performance_impact: u8,
}

impl ConfidenceMetrics {
    /// Build from values in [`MetricKind::ALL`] order, clamping each
    #[must_use]
    pub fn new(values: [u8; 6]) -> Self {
        let [s, t, p, m, r, f] = values;
        Self {
            syntax_validation: s.min(MetricKind::SyntaxValidation.max()),
            test_execution: t.min(MetricKind::TestExecution.max()),
            pattern_alignment: p.min(MetricKind::PatternAlignment.max()),
            memory_consistency: m.min(MetricKind::MemoryConsistency.max()),
            risk_assessment: r.min(MetricKind::RiskAssessment.max()),
            performance_impact: f.min(MetricKind::PerformanceImpact.max()),
        }
    }

    #[must_use]
    pub fn get(&self, kind: MetricKind) -> u8 {
        match kind {
            MetricKind::SyntaxValidation => self.syntax_validation,
            MetricKind::TestExecution => self.test_execution,
            MetricKind::PatternAlignment => self.pattern_alignment,
            MetricKind::MemoryConsistency => self.memory_consistency,
            MetricKind::RiskAssessment => self.risk_assessment,
            MetricKind::PerformanceImpact => self.performance_impact,
        }
    }

    /// Sum of the sub-scores, clamped to 0-100
    #[must_use]
    pub fn total(&self) -> u8 {
        let sum: u32 = MetricKind::ALL.iter().map(|k| u32::from(self.get(*k))).sum();
        u8::try_from(sum.min(100)).unwrap_or(100)
    }

    /// Every metric with its score, in [`MetricKind::ALL`] order
    #[must_use]
    pub fn breakdown(&self) -> Vec<(MetricKind, u8)> {
        MetricKind::ALL.iter().map(|k| (*k, self.get(*k))).collect()
    }

    /// Metrics below their maximum, lowest fraction of maximum first
    #[must_use]
    pub fn weakest(&self) -> Vec<MetricKind> {
        let mut kinds: Vec<MetricKind> = MetricKind::ALL
            .into_iter()
            .filter(|k| self.get(*k) < k.max())
            .collect();
        kinds.sort_by(|a, b| fraction_cmp(self.get(*a), a.max(), self.get(*b), b.max()));
        kinds
    }
}

fn fraction_cmp(a: u8, a_max: u8, b: u8, b_max: u8) -> Ordering {
    (u32::from(a) * u32::from(b_max)).cmp(&(u32::from(b) * u32::from(a_max)))
}

/// Maps evidence to metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    /// Score evidence
    #[must_use]
    pub fn score(evidence: &Evidence) -> ConfidenceMetrics {
        ConfidenceMetrics::new([
            syntax_score(evidence.syntax),
            test_score(evidence.tests),
            pattern_score(&evidence.established, &evidence.signals),
            memory_score(evidence.memory.similar, evidence.memory.contradictions, evidence.memory.improvements, evidence.memory.agreements),
            risk_score(&evidence.risks),
            performance_score(total_penalty(&evidence.performance)),
        ])
    }
}

#[must_use]
pub fn syntax_score(outcome: SyntaxOutcome) -> u8 {
    match outcome {
        SyntaxOutcome::Clean => 20,
        SyntaxOutcome::Diagnostics { count } => {
            u8::try_from(20u32.saturating_sub(count.saturating_mul(3))).unwrap_or(0)
        }
        SyntaxOutcome::Unsupported => 10,
        SyntaxOutcome::Empty | SyntaxOutcome::TimedOut | SyntaxOutcome::Failed => 0,
    }
}

#[must_use]
pub fn test_score(outcome: TestOutcome) -> u8 {
    const NEUTRAL: u8 = 12;
    match outcome {
        TestOutcome::NotLocated | TestOutcome::Disabled => NEUTRAL,
        TestOutcome::TimedOut | TestOutcome::RunnerFailed => 0,
        TestOutcome::Completed { passed, failed } => {
            let total = u64::from(passed) + u64::from(failed);
            if total == 0 {
                NEUTRAL
            } else if failed == 0 {
                25
            } else {
                u8::try_from(25 * u64::from(passed) / total).unwrap_or(0)
            }
        }
    }
}

/// Architecture 8, naming 6, style 6
#[must_use]
pub fn pattern_score(established: &PatternSummary, candidate: &PatternSummary) -> u8 {
    let arch = [
        compare(established.architecture.module_system, candidate.architecture.module_system),
        compare(established.architecture.async_style, candidate.architecture.async_style),
        compare(established.architecture.error_style, candidate.architecture.error_style),
    ];
    let naming = [
        compare(established.naming.functions, candidate.naming.functions),
        compare(established.naming.types, candidate.naming.types),
        compare(established.naming.constants, candidate.naming.constants),
    ];
    let style = [
        compare(established.style.indentation, candidate.style.indentation),
        compare(established.style.quotes, candidate.style.quotes),
        compare(established.style.semicolons, candidate.style.semicolons),
    ];
    dimension(8, &arch) + dimension(6, &naming) + dimension(6, &style)
}

fn compare<T: PartialEq>(established: Option<T>, candidate: Option<T>) -> Option<bool> {
    match (established, candidate) {
        (Some(e), Some(c)) => Some(e == c),
        _ => None,
    }
}

/// Half weight when nothing is comparable, else weight x match ratio
fn dimension(weight: u8, fields: &[Option<bool>]) -> u8 {
    let compared = fields.iter().flatten().count();
    if compared == 0 {
        return weight / 2;
    }
    let matched = fields.iter().flatten().filter(|m| **m).count();
    u8::try_from(usize::from(weight) * matched / compared).unwrap_or(weight)
}

#[must_use]
pub fn memory_score(similar: u32, contradictions: u32, improvements: u32, agreements: u32) -> u8 {
    if similar == 0 {
        return 12;
    }
    let raw = 10 - 3 * i64::from(contradictions) + 2 * i64::from(improvements) + i64::from(agreements);
    u8::try_from(raw.clamp(0, 15)).unwrap_or(0)
}

#[must_use]
pub fn risk_score(risks: &RiskIndicators) -> u8 {
    let mut penalty = 0u8;
    if !risks.breaking_changes.is_empty() {
        penalty += 3;
    }
    if risks.security_finding {
        penalty += 4;
    }
    if risks.sensitive_data {
        penalty += 2;
    }
    if risks.performance_regression {
        penalty += 2;
    }
    if risks.dependency_change {
        penalty += 2;
    }
    10u8.saturating_sub(penalty)
}

#[must_use]
pub fn performance_score(penalty: u32) -> u8 {
    u8::try_from(10u32.saturating_sub(penalty)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::memory::MemoryAssessment;
    use crate::perf::PerformanceHit;
    use crate::signals::{ArchitecturePatterns, ModuleSystem, NamingPatterns, NamingStyle};

    #[test]
    fn syntax_curve() {
        assert_eq!(syntax_score(SyntaxOutcome::Clean), 20);
        assert_eq!(syntax_score(SyntaxOutcome::Diagnostics { count: 2 }), 14);
        assert_eq!(syntax_score(SyntaxOutcome::Diagnostics { count: 7 }), 0);
        assert_eq!(syntax_score(SyntaxOutcome::Diagnostics { count: u32::MAX }), 0);
        assert_eq!(syntax_score(SyntaxOutcome::Unsupported), 10);
        assert_eq!(syntax_score(SyntaxOutcome::Empty), 0);
        assert_eq!(syntax_score(SyntaxOutcome::TimedOut), 0);
    }

    #[test]
    fn test_curve() {
        assert_eq!(test_score(TestOutcome::NotLocated), 12);
        assert_eq!(test_score(TestOutcome::Completed { passed: 4, failed: 0 }), 25);
        assert_eq!(test_score(TestOutcome::Completed { passed: 3, failed: 1 }), 18);
        assert_eq!(test_score(TestOutcome::Completed { passed: 0, failed: 5 }), 0);
        assert_eq!(test_score(TestOutcome::Completed { passed: 0, failed: 0 }), 12);
        assert_eq!(test_score(TestOutcome::TimedOut), 0);
    }

    #[test]
    fn pattern_alignment_weights() {
        let empty = PatternSummary::default();
        assert_eq!(pattern_score(&empty, &empty), 10);

        let established = PatternSummary {
            architecture: ArchitecturePatterns {
                module_system: Some(ModuleSystem::EsModules),
                ..ArchitecturePatterns::default()
            },
            naming: NamingPatterns {
                functions: Some(NamingStyle::CamelCase),
                types: Some(NamingStyle::PascalCase),
                ..NamingPatterns::default()
            },
            ..PatternSummary::default()
        };
        let mut candidate = established;
        assert_eq!(pattern_score(&established, &candidate), 8 + 6 + 3);

        candidate.architecture.module_system = Some(ModuleSystem::CommonJs);
        candidate.naming.types = Some(NamingStyle::SnakeCase);
        assert_eq!(pattern_score(&established, &candidate), 3 + 3);
    }

    #[test]
    fn memory_curve() {
        assert_eq!(memory_score(0, 0, 0, 0), 12);
        assert_eq!(memory_score(2, 0, 0, 2), 12);
        assert_eq!(memory_score(5, 5, 0, 0), 0);
        assert_eq!(memory_score(5, 0, 5, 5), 15);
    }

    #[test]
    fn risk_penalties() {
        assert_eq!(risk_score(&RiskIndicators::default()), 10);
        let all = RiskIndicators {
            breaking_changes: vec!["f".into()],
            security_finding: true,
            sensitive_data: true,
            performance_regression: true,
            dependency_change: true,
        };
        assert_eq!(risk_score(&all), 0);
    }

    #[test]
    fn neutral_evidence_scores_review_range() {
        let metrics = ConfidenceScorer::score(&Evidence::neutral(SyntaxOutcome::Clean));
        assert_eq!(metrics.breakdown().iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![20, 12, 10, 12, 10, 10]);
        assert_eq!(metrics.total(), 74);
    }

    #[test]
    fn weakest_orders_by_fraction() {
        let metrics = ConfidenceMetrics::new([20, 5, 20, 15, 2, 10]);
        assert_eq!(metrics.weakest(), vec![MetricKind::TestExecution, MetricKind::RiskAssessment]);
    }

    #[test]
    fn deserialization_clamps() {
        let metrics: ConfidenceMetrics = serde_json::from_str(
            r#"{"syntax_validation":99,"test_execution":25,"pattern_alignment":20,
                "memory_consistency":15,"risk_assessment":10,"performance_impact":10}"#,
        )
        .unwrap();
        assert_eq!(metrics.get(MetricKind::SyntaxValidation), 20);
        assert_eq!(metrics.total(), 100);
    }

    #[test]
    fn performance_hits_reduce_score() {
        let mut evidence = Evidence::neutral(SyntaxOutcome::Clean);
        evidence.performance = vec![
            PerformanceHit { rule_id: "a".into(), penalty: 3, description: String::new() },
            PerformanceHit { rule_id: "b".into(), penalty: 9, description: String::new() },
        ];
        evidence.memory = MemoryAssessment { similar: 1, agreements: 1, ..MemoryAssessment::default() };
        let metrics = ConfidenceScorer::score(&evidence);
        assert_eq!(metrics.get(MetricKind::PerformanceImpact), 0);
        assert_eq!(metrics.get(MetricKind::MemoryConsistency), 11);
    }
}
