//! Deployment decision gate
//!
//! Stateless: a decision depends only on the [`DecisionInput`], so
//! re-deciding an unchanged input yields an identical decision.

use cgate_confidence::{ConfidenceMetrics, MemoryEntry, RiskIndicators};
use cgate_security::MaliciousCategory;
use serde::{Deserialize, Serialize};

use crate::error::DecisionError;
use crate::suggestions::{rank_suggestions, Suggestion};
use crate::tier::{DeploymentTier, GateThresholds};

/// Everything the gate looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionInput {
    pub score: u8,
    /// Breakdown behind `score`, when known
    pub metrics: Option<ConfidenceMetrics>,
    pub malicious: Vec<MaliciousCategory>,
    pub risks: RiskIndicators,
    /// Similar prior entries, most relevant first
    pub similar: Vec<MemoryEntry>,
}

impl DecisionInput {
    /// Input carrying only a score
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        Self {
            score: score.min(100),
            metrics: None,
            malicious: Vec::new(),
            risks: RiskIndicators::default(),
            similar: Vec::new(),
        }
    }

    /// Input for a full evaluation; the score is the metrics total
    #[must_use]
    pub fn from_metrics(metrics: ConfidenceMetrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::from_score(metrics.total())
        }
    }

    #[must_use]
    pub fn with_malicious(mut self, categories: Vec<MaliciousCategory>) -> Self {
        self.malicious = categories;
        self
    }

    #[must_use]
    pub fn with_risks(mut self, risks: RiskIndicators) -> Self {
        self.risks = risks;
        self
    }

    #[must_use]
    pub fn with_similar(mut self, similar: Vec<MemoryEntry>) -> Self {
        self.similar = similar;
        self
    }
}

/// Material for a human reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPackage {
    pub metrics: Option<ConfidenceMetrics>,
    pub risks: Vec<String>,
    pub security_findings: Vec<MaliciousCategory>,
    pub similar: Vec<MemoryEntry>,
    pub next_steps: Vec<Suggestion>,
}

/// Tier-specific output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecisionDetail {
    /// Ranked improvements (Blocked, SandboxOnly)
    Suggestions(Vec<Suggestion>),
    Review(ReviewPackage),
    Deploy,
}

/// Outcome of the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDecision {
    pub tier: DeploymentTier,
    pub score: u8,
    pub reason: String,
    /// Set when a security finding lowered the tier
    pub overridden: bool,
    pub detail: DecisionDetail,
}

impl DeploymentDecision {
    #[inline]
    #[must_use]
    pub fn allows_deploy(&self) -> bool {
        self.tier.allows_deploy()
    }

    /// Actionable next steps, whatever the tier
    #[must_use]
    pub fn next_steps(&self) -> &[Suggestion] {
        match &self.detail {
            DecisionDetail::Suggestions(s) => s,
            DecisionDetail::Review(pkg) => &pkg.next_steps,
            DecisionDetail::Deploy => &[],
        }
    }
}

/// Maps scores and findings to deployment tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentGate {
    thresholds: GateThresholds,
}

impl DeploymentGate {
    /// Create a gate with validated thresholds
    ///
    /// # Errors
    /// [`DecisionError::InvalidThresholds`] if the bounds are not ordered.
    pub fn new(thresholds: GateThresholds) -> Result<Self, DecisionError> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    #[inline]
    #[must_use]
    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Decide
    ///
    /// Malicious findings cap the tier at [`DeploymentTier::ReviewRequired`].
    #[must_use]
    pub fn decide(&self, input: &DecisionInput) -> DeploymentDecision {
        let score = input.score.min(100);
        let by_score = self.thresholds.tier_for(score);
        let overridden = !input.malicious.is_empty() && by_score == DeploymentTier::AutoDeploy;
        let tier = if overridden {
            DeploymentTier::ReviewRequired
        } else {
            by_score
        };

        let next_steps = match &input.metrics {
            Some(metrics) => rank_suggestions(metrics, &input.risks, &input.malicious),
            None => score_only_steps(score, &input.malicious),
        };
        let t = &self.thresholds;
        let (reason, detail) = match tier {
            DeploymentTier::Blocked => (
                format!("confidence {score} is below {}; continue in the sandbox", t.sandbox_only),
                DecisionDetail::Suggestions(next_steps),
            ),
            DeploymentTier::SandboxOnly => (
                format!(
                    "confidence {score} is close but below review threshold {}; keep iterating in the sandbox",
                    t.review
                ),
                DecisionDetail::Suggestions(next_steps),
            ),
            DeploymentTier::ReviewRequired => {
                let reason = if overridden {
                    format!(
                        "confidence {score} meets auto-deploy threshold {} but malicious patterns were detected; human review required",
                        t.auto_deploy
                    )
                } else {
                    format!("confidence {score} requires human review before deployment")
                };
                let package = ReviewPackage {
                    metrics: input.metrics,
                    risks: input.risks.descriptions(),
                    security_findings: input.malicious.clone(),
                    similar: input.similar.iter().take(t.review_history).cloned().collect(),
                    next_steps,
                };
                (reason, DecisionDetail::Review(package))
            }
            DeploymentTier::AutoDeploy => (
                format!("confidence {score} meets auto-deploy threshold {}", t.auto_deploy),
                DecisionDetail::Deploy,
            ),
        };

        tracing::debug!(score, %tier, overridden, "deployment decision");
        DeploymentDecision {
            tier,
            score,
            reason,
            overridden,
            detail,
        }
    }
}

fn score_only_steps(score: u8, malicious: &[MaliciousCategory]) -> Vec<Suggestion> {
    let mut out = Vec::new();
    if !malicious.is_empty() {
        let names: Vec<&str> = malicious.iter().map(|c| c.as_str()).collect();
        out.push(Suggestion::new(
            None,
            0,
            format!("remove flagged constructs ({})", names.join(", ")),
        ));
    }
    if score < 100 {
        out.push(Suggestion::new(
            None,
            100 - score,
            "re-run the evaluation to see which metrics fall short",
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use cgate_confidence::EntryOutcome;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn malicious_never_auto_deploys() {
        let gate = DeploymentGate::default();
        let input = DecisionInput::from_score(96).with_malicious(vec![MaliciousCategory::DynamicEval]);
        let decision = gate.decide(&input);
        assert_eq!(decision.tier, DeploymentTier::ReviewRequired);
        assert!(decision.overridden);
        assert!(decision.reason.contains("malicious"));
        let DecisionDetail::Review(package) = &decision.detail else {
            panic!("expected review package");
        };
        assert_eq!(package.security_findings, vec![MaliciousCategory::DynamicEval]);
    }

    #[test]
    fn malicious_low_score_stays_blocked() {
        let gate = DeploymentGate::default();
        let input = DecisionInput::from_score(20).with_malicious(vec![MaliciousCategory::DestructiveFs]);
        let decision = gate.decide(&input);
        assert_eq!(decision.tier, DeploymentTier::Blocked);
        assert!(!decision.overridden);
        assert!(!decision.next_steps().is_empty());
    }

    #[test]
    fn review_package_limits_history() {
        let gate = DeploymentGate::new(GateThresholds {
            review_history: 2,
            ..GateThresholds::default()
        })
        .unwrap();
        let similar = (0..4)
            .map(|i| MemoryEntry::new(format!("src/{i}.ts"), EntryOutcome::Accepted, 90))
            .collect();
        let metrics = ConfidenceMetrics::new([20, 12, 10, 12, 10, 10]);
        let decision = gate.decide(&DecisionInput::from_metrics(metrics).with_similar(similar));
        assert_eq!(decision.score, 74);
        let DecisionDetail::Review(package) = decision.detail else {
            panic!("expected review package");
        };
        assert_eq!(package.similar.len(), 2);
        assert_eq!(package.metrics, Some(metrics));
        assert!(package.next_steps.iter().any(|s| s.action == "add tests for this file"));
    }

    #[test]
    fn perfect_score_deploys() {
        let decision = DeploymentGate::default().decide(&DecisionInput::from_metrics(ConfidenceMetrics::new([
            20, 25, 20, 15, 10, 10,
        ])));
        assert_eq!(decision.tier, DeploymentTier::AutoDeploy);
        assert!(decision.allows_deploy());
        assert!(decision.next_steps().is_empty());
    }
}
