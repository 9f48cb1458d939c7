//! Confidence-gated sandbox
//!
//! The command surface over one project. Candidate content is screened,
//! written into the mirror, scored, and gated; only [`ConfidenceSandbox::deploy`]
//! writes to the real tree, and only through the sandbox's re-checked
//! promotion path.
//!
//! # Workflow
//!
//! 1. Resolve the path against the access policy (fail closed)
//! 2. Safety heuristics, then sanitization
//! 3. Write into the mirror, sealed if sensitive or policy-marked
//! 4. Collect evidence against a fixed memory snapshot and score
//! 5. Decide

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use cgate_confidence::{
    CommandTestRunner, ConfidenceMetrics, ConfidenceScorer, EvidenceCollector, InMemoryProjectMemory, MemoryEntry,
    MemorySnapshot, ProjectMemory, RiskIndicators, TestOutcome, TestRunner,
};
use cgate_decision::{DecisionInput, DeploymentDecision, DeploymentGate, DeploymentTier};
use cgate_policy::{AccessPolicy, ProjectPath};
use cgate_sandbox::{ContentDigest, ReadSource, Sandbox, SandboxError, WriteReceipt};
use cgate_security::{
    is_sealed, sanitize, scan_file, validate_safety, CompiledPatterns, ContentCipher, KeyStore, MaliciousCategory,
    SanitizationResult, ScanReport,
};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::CgateConfig;
use crate::error::{CgateError, Result};

/// Result of [`ConfidenceSandbox::execute`] and [`ConfidenceSandbox::run_tests`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    /// Human-readable summary
    pub output: String,
    pub confidence: u8,
    pub metrics: ConfidenceMetrics,
    pub decision: DeploymentDecision,
}

/// Current confidence for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub path: ProjectPath,
    pub metrics: ConfidenceMetrics,
    pub total: u8,
    pub tier: DeploymentTier,
    /// Mirror copy is sealed at rest
    pub sealed: bool,
}

/// Result of [`ConfidenceSandbox::deploy`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeployOutcome {
    Deployed { receipt: WriteReceipt, forced: bool },
    Denied { decision: DeploymentDecision },
}

impl DeployOutcome {
    #[inline]
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed { .. })
    }
}

/// Scored state of one (file, content) pair
#[derive(Debug, Clone)]
struct Evaluation {
    digest: ContentDigest,
    metrics: ConfidenceMetrics,
    tests: TestOutcome,
    malicious: Vec<MaliciousCategory>,
    risks: RiskIndicators,
    similar: Vec<MemoryEntry>,
}

impl Evaluation {
    fn input(&self) -> DecisionInput {
        DecisionInput::from_metrics(self.metrics)
            .with_malicious(self.malicious.clone())
            .with_risks(self.risks.clone())
            .with_similar(self.similar.clone())
    }
}

/// Plaintext of a candidate, wherever it was read from
struct Candidate {
    text: String,
    sealed: bool,
    source: ReadSource,
}

/// Confidence-gated sandbox for one project
pub struct ConfidenceSandbox {
    config: CgateConfig,
    sandbox: Sandbox,
    patterns: CompiledPatterns,
    collector: EvidenceCollector,
    gate: DeploymentGate,
    memory: Arc<dyn ProjectMemory>,
    keys: KeyStore,
    cipher: OnceCell<ContentCipher>,
    evaluations: RwLock<HashMap<ProjectPath, Evaluation>>,
}

impl std::fmt::Debug for ConfidenceSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidenceSandbox")
            .field("root", &self.sandbox.root())
            .field("patterns", &self.patterns.version())
            .field("gate", &self.gate)
            .field("evaluations", &self.evaluations.read().len())
            .finish_non_exhaustive()
    }
}

impl ConfidenceSandbox {
    /// Project memory file inside the state directory
    pub const MEMORY_FILE: &'static str = "memory.json";

    /// Open the sandbox for `root` with explicit collaborators
    ///
    /// # Errors
    /// Invalid configuration, an unusable root, or a state directory that
    /// cannot be prepared.
    pub async fn open(
        root: impl AsRef<Path>,
        config: CgateConfig,
        memory: Arc<dyn ProjectMemory>,
        runner: Arc<dyn TestRunner>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = Arc::new(AccessPolicy::new(root.as_ref(), config.effective_policy())?);
        let patterns = config.security.compile_patterns(policy.root())?;
        let collector = EvidenceCollector::new(config.scoring.clone(), runner)?;
        let gate = DeploymentGate::new(config.gate)?;
        let sandbox = Sandbox::initialize(policy, config.sandbox.clone()).await?;
        let keys = KeyStore::in_state_dir(sandbox.state_dir());

        tracing::info!(
            root = %sandbox.root().display(),
            patterns = patterns.version(),
            "confidence sandbox ready"
        );
        Ok(Self {
            config,
            sandbox,
            patterns,
            collector,
            gate,
            memory,
            keys,
            cipher: OnceCell::new(),
            evaluations: RwLock::new(HashMap::new()),
        })
    }

    /// Open with the project's configuration file, its memory file if any,
    /// and the command test runner
    ///
    /// # Errors
    /// As [`Self::open`], plus an unreadable memory file.
    pub async fn open_project(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let config = CgateConfig::load(root)?;
        let memory_file = root.join(&config.sandbox.state_dir).join(Self::MEMORY_FILE);
        let memory = if memory_file.is_file() {
            InMemoryProjectMemory::load_json(&memory_file)?
        } else {
            InMemoryProjectMemory::new()
        };
        Self::open(root, config, Arc::new(memory), Arc::new(CommandTestRunner::new())).await
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &CgateConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    #[inline]
    #[must_use]
    pub fn gate(&self) -> &DeploymentGate {
        &self.gate
    }

    /// Screen, write, score, and gate candidate content for `file`
    ///
    /// # Errors
    /// - Path or policy violation (nothing written)
    /// - [`CgateError::UnsafeContent`] (nothing written)
    /// - Sealing failure (nothing written)
    /// - Mirror IO failure
    pub async fn execute(&self, file: impl AsRef<Path>, content: &str) -> Result<CommandOutcome> {
        let file = file.as_ref();
        let path = match self.sandbox.policy().check_write(file, content.len() as u64) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "execute rejected");
                return Err(e.into());
            }
        };

        let safety = validate_safety(content.as_bytes(), &self.config.security.limits);
        if !safety.is_safe {
            tracing::warn!(path = %path, risks = safety.risks.len(), "unsafe content rejected");
            return Err(CgateError::UnsafeContent {
                path: path.to_string(),
                risks: safety.risks,
            });
        }

        let sanitization = sanitize(content, &path.to_string(), &self.patterns);
        let seal = sanitization.sensitive_data_found || self.sandbox.policy().should_seal(&path);
        let target = path.to_relative_path();
        let receipt = if seal {
            let cipher = self.cipher()?;
            self.sandbox
                .write_file_sealed(&target, content.as_bytes(), cipher)
                .await?
        } else {
            self.sandbox.write_file(&target, content.as_bytes()).await?
        };

        let evaluation = self.evaluate(&path, content, &sanitization).await;
        let decision = self.gate.decide(&evaluation.input());
        tracing::info!(
            path = %path,
            score = evaluation.metrics.total(),
            tier = %decision.tier,
            sealed = receipt.sealed,
            redactions = sanitization.redaction_count,
            "candidate evaluated"
        );

        let mut output = summary(&path, &evaluation, &decision);
        if receipt.sealed {
            output.push_str("mirror copy sealed at rest\n");
        }
        if sanitization.redaction_count > 0 {
            let _ = writeln!(output, "{} sensitive value(s) detected", sanitization.redaction_count);
        }
        Ok(CommandOutcome {
            success: true,
            output,
            confidence: evaluation.metrics.total(),
            metrics: evaluation.metrics,
            decision,
        })
    }

    /// Re-run tests and re-score `files`, or every mirror candidate if empty
    ///
    /// The reported confidence is the weakest file's. Succeeds only if tests
    /// ran for every file and none failed.
    ///
    /// # Errors
    /// Path violations, unreadable candidates, or nothing to evaluate.
    pub async fn run_tests(&self, files: &[impl AsRef<Path>]) -> Result<CommandOutcome> {
        let paths = if files.is_empty() {
            self.sandbox.written_files().await
        } else {
            files
                .iter()
                .map(|f| self.resolve(f.as_ref()))
                .collect::<Result<Vec<_>>>()?
        };
        if paths.is_empty() {
            return Err(CgateError::NoCandidate("no files written to the sandbox".into()));
        }

        let mut output = String::new();
        let mut success = true;
        let mut weakest: Option<(ProjectPath, Evaluation)> = None;
        for path in paths {
            let candidate = self.candidate(&path).await?;
            let sanitization = sanitize(&candidate.text, &path.to_string(), &self.patterns);
            let evaluation = self.evaluate(&path, &candidate.text, &sanitization).await;

            success &= matches!(evaluation.tests, TestOutcome::Completed { failed: 0, .. });
            let _ = writeln!(
                output,
                "{path}: {} (confidence {})",
                describe_tests(evaluation.tests),
                evaluation.metrics.total()
            );
            let replace = weakest
                .as_ref()
                .map_or(true, |(_, w)| evaluation.metrics.total() < w.metrics.total());
            if replace {
                weakest = Some((path, evaluation));
            }
        }

        let Some((path, evaluation)) = weakest else {
            return Err(CgateError::NoCandidate("no files written to the sandbox".into()));
        };
        let decision = self.gate.decide(&evaluation.input());
        output.push_str(&summary(&path, &evaluation, &decision));
        tracing::info!(success, weakest = %path, score = evaluation.metrics.total(), "tests run");
        Ok(CommandOutcome {
            success,
            output,
            confidence: evaluation.metrics.total(),
            metrics: evaluation.metrics,
            decision,
        })
    }

    /// Metrics for the current content of `file`
    ///
    /// Served from the last evaluation when the content is unchanged.
    ///
    /// # Errors
    /// Path violations, a missing file, or a sealed entry that cannot be opened.
    pub async fn get_confidence(&self, file: impl AsRef<Path>) -> Result<ConfidenceReport> {
        let path = self.resolve(file.as_ref())?;
        let (candidate, evaluation) = self.current_evaluation(&path).await?;
        let decision = self.gate.decide(&evaluation.input());
        Ok(ConfidenceReport {
            path,
            metrics: evaluation.metrics,
            total: evaluation.metrics.total(),
            tier: decision.tier,
            sealed: candidate.sealed,
        })
    }

    /// Gate decision for `file` at the given confidence
    ///
    /// Security findings for the file's current content always apply, so a
    /// caller-supplied score cannot lift flagged content past review.
    ///
    /// # Errors
    /// Path violations or an unreadable candidate.
    pub async fn check_deployment_permission(
        &self,
        file: impl AsRef<Path>,
        confidence: u8,
    ) -> Result<DeploymentDecision> {
        let path = self.resolve(file.as_ref())?;
        let evaluation = match self.current_evaluation(&path).await {
            Ok((_, evaluation)) => Some(evaluation),
            Err(CgateError::Sandbox(SandboxError::NotFound(_))) => None,
            Err(e) => return Err(e),
        };
        let input = match evaluation {
            Some(e) if e.metrics.total() == confidence => e.input(),
            Some(e) => DecisionInput::from_score(confidence)
                .with_malicious(e.malicious)
                .with_risks(e.risks)
                .with_similar(e.similar),
            None => DecisionInput::from_score(confidence),
        };
        Ok(self.gate.decide(&input))
    }

    /// Promote the mirror candidate for `file` into the project tree
    ///
    /// Without `force` the gate must allow deployment. With `force` the
    /// score is ignored, but the access policy is still enforced.
    ///
    /// # Errors
    /// Path or policy violation, no candidate in the mirror, or IO failure.
    pub async fn deploy(&self, file: impl AsRef<Path>, force: bool) -> Result<DeployOutcome> {
        let path = self.resolve(file.as_ref())?;
        if !self.sandbox.in_mirror(&path).await {
            return Err(CgateError::NoCandidate(path.to_string()));
        }
        let (candidate, evaluation) = self.current_evaluation(&path).await?;

        if force {
            tracing::warn!(path = %path, score = evaluation.metrics.total(), "forced deploy skips the confidence gate");
        } else {
            let decision = self.gate.decide(&evaluation.input());
            if !decision.allows_deploy() {
                tracing::info!(path = %path, tier = %decision.tier, "deploy denied");
                return Ok(DeployOutcome::Denied { decision });
            }
        }

        let receipt = self.sandbox.promote(&path, candidate.text.as_bytes()).await?;
        Ok(DeployOutcome::Deployed { receipt, forced: force })
    }

    /// Validate and sanitize an existing project file without modifying it
    ///
    /// # Errors
    /// [`cgate_security::SecurityError::Rejected`] for invalid paths; IO failure.
    pub async fn scan_file(&self, file: impl AsRef<Path>) -> Result<ScanReport> {
        Ok(scan_file(file, self.sandbox.policy(), &self.patterns).await?)
    }

    /// Re-evaluate every candidate in the mirror
    ///
    /// Files that fail to evaluate are logged and skipped.
    pub async fn rescan(&self) -> Vec<ConfidenceReport> {
        let mut reports = Vec::new();
        for path in self.sandbox.written_files().await {
            let candidate = match self.candidate(&path).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "rescan skipped file");
                    continue;
                }
            };
            let sanitization = sanitize(&candidate.text, &path.to_string(), &self.patterns);
            let evaluation = self.evaluate(&path, &candidate.text, &sanitization).await;
            let tier = self.gate.decide(&evaluation.input()).tier;
            reports.push(ConfidenceReport {
                path,
                metrics: evaluation.metrics,
                total: evaluation.metrics.total(),
                tier,
                sealed: candidate.sealed,
            });
        }
        tracing::debug!(files = reports.len(), "rescan complete");
        reports
    }

    /// Remove temporary artifacts; `all` also discards the mirror
    ///
    /// # Errors
    /// [`SandboxError::Busy`] while an operation is in flight; IO failure.
    pub async fn clean(&self, all: bool) -> Result<()> {
        self.sandbox.clean(all).await?;
        if all {
            self.evaluations.write().clear();
        }
        Ok(())
    }

    /// Discard the mirror and resynchronize from the project tree
    ///
    /// # Errors
    /// [`SandboxError::Busy`] while an operation is in flight; IO failure.
    pub async fn reset(&self) -> Result<()> {
        self.sandbox.reset().await?;
        self.evaluations.write().clear();
        Ok(())
    }

    fn resolve(&self, file: &Path) -> Result<ProjectPath> {
        let policy = self.sandbox.policy();
        let path = policy.resolve(file)?;
        policy.check_path(&path)?;
        Ok(path)
    }

    fn cipher(&self) -> Result<&ContentCipher> {
        Ok(self
            .cipher
            .get_or_try_init(|| ContentCipher::from_store(&self.keys, self.config.security.kdf_iterations))?)
    }

    async fn candidate(&self, path: &ProjectPath) -> Result<Candidate> {
        let read = self.sandbox.read_file(path.to_relative_path()).await?;
        let text = String::from_utf8(read.content).map_err(|_| CgateError::NotText(path.to_string()))?;
        if read.source == ReadSource::Mirror && is_sealed(&text) {
            let text = self.cipher()?.open_text(&text)?;
            return Ok(Candidate {
                text,
                sealed: true,
                source: read.source,
            });
        }
        Ok(Candidate {
            text,
            sealed: false,
            source: read.source,
        })
    }

    async fn current_evaluation(&self, path: &ProjectPath) -> Result<(Candidate, Evaluation)> {
        let candidate = self.candidate(path).await?;
        let digest = ContentDigest::compute(candidate.text.as_bytes());
        let cached = self
            .evaluations
            .read()
            .get(path)
            .filter(|e| e.digest == digest)
            .cloned();
        if let Some(evaluation) = cached {
            return Ok((candidate, evaluation));
        }
        tracing::debug!(path = %path, source = ?candidate.source, "evaluating current content");
        let sanitization = sanitize(&candidate.text, &path.to_string(), &self.patterns);
        let evaluation = self.evaluate(path, &candidate.text, &sanitization).await;
        Ok((candidate, evaluation))
    }

    async fn evaluate(&self, path: &ProjectPath, content: &str, sanitization: &SanitizationResult) -> Evaluation {
        let snapshot = MemorySnapshot::capture(
            self.memory.as_ref(),
            &path.to_string(),
            self.config.scoring.similar_limit,
        )
        .await;
        let evidence = self
            .collector
            .collect(&self.sandbox, path, content, sanitization, &snapshot)
            .await;
        let evaluation = Evaluation {
            digest: ContentDigest::compute(content.as_bytes()),
            metrics: ConfidenceScorer::score(&evidence),
            tests: evidence.tests,
            malicious: sanitization.malicious_categories(),
            risks: evidence.risks,
            similar: snapshot.similar,
        };
        self.evaluations.write().insert(path.clone(), evaluation.clone());
        evaluation
    }
}

fn describe_tests(outcome: TestOutcome) -> String {
    match outcome {
        TestOutcome::NotLocated => "no tests located".to_string(),
        TestOutcome::Disabled => "tests disabled".to_string(),
        TestOutcome::Completed { passed, failed } => format!("{passed} passed, {failed} failed"),
        TestOutcome::TimedOut => "tests timed out".to_string(),
        TestOutcome::RunnerFailed => "test runner failed".to_string(),
    }
}

fn summary(path: &ProjectPath, evaluation: &Evaluation, decision: &DeploymentDecision) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{path}: confidence {}/100 ({})", evaluation.metrics.total(), decision.tier);
    for (kind, score) in evaluation.metrics.breakdown() {
        let _ = writeln!(out, "  {:<20} {score:>3}/{}", kind.label(), kind.max());
    }
    let _ = writeln!(out, "{}", decision.reason);
    for risk in evaluation.risks.descriptions() {
        let _ = writeln!(out, "  risk: {risk}");
    }
    for step in decision.next_steps() {
        let _ = writeln!(out, "  next: {}", step.action);
    }
    out
}
