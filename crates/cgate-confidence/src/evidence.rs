//! Evidence collection
//!
//! Everything impure about scoring happens here: parsing under a timeout,
//! running tests, reading the real-tree original. The result is a plain
//! [`Evidence`] value the scorer turns into metrics without further I/O.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cgate_policy::ProjectPath;
use cgate_sandbox::{ReadSource, Sandbox};
use cgate_security::{is_sealed, SanitizationResult};
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;
use crate::language::SourceLanguage;
use crate::memory::{MemoryAssessment, MemorySnapshot};
use crate::perf::{total_penalty, PerformanceHit, PerformanceRules};
use crate::risk::{is_dependency_manifest, RiskIndicators};
use crate::signals::{extract_signals, PatternSummary};
use crate::symbols::{exported_symbols_until, removed_exports};
use crate::syntax::{SyntaxChecker, SyntaxOutcome};
use crate::testing::{is_test_file, test_candidates, TestRequest, TestRunner};

/// Scoring section of the project configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub parse_timeout_ms: u64,
    pub test_timeout_ms: u64,
    pub run_tests: bool,
    /// Similar memory entries consulted per evaluation
    pub similar_limit: usize,
    /// Syntax outcomes kept in the cache
    pub cache_capacity: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            parse_timeout_ms: 2_000,
            test_timeout_ms: 60_000,
            run_tests: true,
            similar_limit: 5,
            cache_capacity: 1_024,
        }
    }
}

impl ScoringConfig {
    #[inline]
    #[must_use]
    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    #[must_use]
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_run_tests(mut self, run: bool) -> Self {
        self.run_tests = run;
        self
    }
}

/// How the test step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    NotLocated,
    Disabled,
    Completed { passed: u32, failed: u32 },
    TimedOut,
    RunnerFailed,
}

/// Inputs to the scorer for one (file, content) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub language: Option<SourceLanguage>,
    pub syntax: SyntaxOutcome,
    pub tests: TestOutcome,
    /// Signals extracted from the candidate
    pub signals: PatternSummary,
    /// Patterns the project has established
    pub established: PatternSummary,
    pub memory: MemoryAssessment,
    pub risks: RiskIndicators,
    pub performance: Vec<PerformanceHit>,
}

impl Evidence {
    /// Evidence for content nothing is known about
    #[must_use]
    pub fn neutral(syntax: SyntaxOutcome) -> Self {
        Self {
            language: None,
            syntax,
            tests: TestOutcome::NotLocated,
            signals: PatternSummary::default(),
            established: PatternSummary::default(),
            memory: MemoryAssessment::default(),
            risks: RiskIndicators::default(),
            performance: Vec::new(),
        }
    }
}

/// Gathers [`Evidence`] for candidates in a sandbox
pub struct EvidenceCollector {
    config: ScoringConfig,
    syntax: SyntaxChecker,
    performance: PerformanceRules,
    runner: Arc<dyn TestRunner>,
}

impl std::fmt::Debug for EvidenceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceCollector")
            .field("config", &self.config)
            .field("performance_rules", &self.performance.len())
            .finish_non_exhaustive()
    }
}

impl EvidenceCollector {
    /// Create a collector with the built-in performance rules
    ///
    /// # Errors
    /// Only if the embedded rule table is malformed.
    pub fn new(config: ScoringConfig, runner: Arc<dyn TestRunner>) -> Result<Self, ScoringError> {
        Ok(Self::with_rules(config, runner, PerformanceRules::builtin()?))
    }

    #[must_use]
    pub fn with_rules(config: ScoringConfig, runner: Arc<dyn TestRunner>, performance: PerformanceRules) -> Self {
        let syntax = SyntaxChecker::new(config.cache_capacity, config.parse_timeout());
        Self {
            config,
            syntax,
            performance,
            runner,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Collect evidence for plaintext `content` proposed at `path`
    ///
    /// Never fails: each failed step degrades its own part of the evidence.
    pub async fn collect(
        &self,
        sandbox: &Sandbox,
        path: &ProjectPath,
        content: &str,
        sanitization: &SanitizationResult,
        memory: &MemorySnapshot,
    ) -> Evidence {
        let language = SourceLanguage::detect(path);
        let content: Arc<str> = Arc::from(content);

        let syntax = self.syntax.check(&content, language).await;
        let tests = self.run_tests(sandbox, path, &content).await;
        let signals = extract_signals(&content, language);
        let assessment = memory.assess(&signals.tags());
        let performance = self.performance.evaluate(&content, language);
        let risks = self
            .risks(sandbox, path, &content, language, sanitization, &performance)
            .await;

        tracing::debug!(
            path = %path,
            ?syntax,
            ?tests,
            similar = assessment.similar,
            performance_hits = performance.len(),
            "evidence collected"
        );
        Evidence {
            language,
            syntax,
            tests,
            signals,
            established: memory.patterns,
            memory: assessment,
            risks,
            performance,
        }
    }

    /// Locate and run tests for the candidate under the test timeout
    pub async fn run_tests(&self, sandbox: &Sandbox, path: &ProjectPath, content: &Arc<str>) -> TestOutcome {
        if !self.config.run_tests {
            return TestOutcome::Disabled;
        }
        let Some(language) = SourceLanguage::detect(path) else {
            return TestOutcome::NotLocated;
        };
        let tests = locate_tests(sandbox, path, content, language).await;
        if tests.is_empty() {
            return TestOutcome::NotLocated;
        }

        let mut overlays = vec![(path.clone(), Arc::clone(content))];
        for test in tests.iter().filter(|t| *t != path) {
            if let Some(text) = mirror_plaintext(sandbox, test).await {
                overlays.push((test.clone(), text));
            }
        }
        let request = TestRequest {
            language,
            target: path.clone(),
            tests,
            overlays,
        };

        let budget = self.config.test_timeout();
        match tokio::time::timeout(budget, self.runner.run(sandbox, &request)).await {
            Ok(Ok(report)) => TestOutcome::Completed {
                passed: report.passed,
                failed: report.failed,
            },
            Ok(Err(e)) => {
                tracing::warn!(path = %path, error = %e, "test runner failed");
                TestOutcome::RunnerFailed
            }
            Err(_) => {
                tracing::warn!(path = %path, timeout = ?budget, "tests timed out");
                TestOutcome::TimedOut
            }
        }
    }

    async fn risks(
        &self,
        sandbox: &Sandbox,
        path: &ProjectPath,
        content: &Arc<str>,
        language: Option<SourceLanguage>,
        sanitization: &SanitizationResult,
        performance: &[PerformanceHit],
    ) -> RiskIndicators {
        let original = match sandbox.read_original(path).await {
            Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "original unavailable");
                None
            }
        };

        let (breaking_changes, performance_regression) = match &original {
            Some(original) => {
                let before = total_penalty(&self.performance.evaluate(original, language));
                let breaking = match language {
                    Some(lang) => self.breaking_changes(original, content, lang).await,
                    None => Vec::new(),
                };
                (breaking, total_penalty(performance) > before)
            }
            None => (Vec::new(), false),
        };

        RiskIndicators {
            breaking_changes,
            security_finding: sanitization.malicious_patterns,
            sensitive_data: sanitization.sensitive_data_found,
            performance_regression,
            dependency_change: is_dependency_manifest(path),
        }
    }

    async fn breaking_changes(&self, original: &str, candidate: &Arc<str>, language: SourceLanguage) -> Vec<String> {
        let original: Arc<str> = Arc::from(original);
        let candidate = Arc::clone(candidate);
        let deadline = Instant::now().checked_add(self.config.parse_timeout());
        let task = tokio::task::spawn_blocking(move || {
            let before = exported_symbols_until(&original, language, deadline)?;
            let after = exported_symbols_until(&candidate, language, deadline)?;
            Some(removed_exports(&before, &after))
        });
        match tokio::time::timeout(self.config.parse_timeout(), task).await {
            Ok(Ok(Some(removed))) => removed,
            Ok(Ok(None)) | Err(_) => {
                tracing::warn!(%language, "export comparison timed out");
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(%language, error = %e, "export comparison failed");
                Vec::new()
            }
        }
    }
}

/// Existing test files for `path`, the file itself first if it holds tests
async fn locate_tests(
    sandbox: &Sandbox,
    path: &ProjectPath,
    content: &str,
    language: SourceLanguage,
) -> Vec<ProjectPath> {
    if is_test_file(path) {
        return vec![path.clone()];
    }
    let mut found = Vec::new();
    if language == SourceLanguage::Rust && content.contains("#[cfg(test)]") {
        found.push(path.clone());
    }
    for candidate in test_candidates(path) {
        if sandbox.policy().check_path(&candidate).is_err() {
            continue;
        }
        let in_project = tokio::fs::metadata(sandbox.policy().absolute(&candidate))
            .await
            .is_ok_and(|m| m.is_file());
        if in_project || sandbox.in_mirror(&candidate).await {
            found.push(candidate);
        }
    }
    found
}

/// Mirror content of a test file, skipping sealed or non-UTF-8 entries
async fn mirror_plaintext(sandbox: &Sandbox, path: &ProjectPath) -> Option<Arc<str>> {
    let read = sandbox.read_file(path.to_relative_path()).await.ok()?;
    if read.source != ReadSource::Mirror {
        return None;
    }
    let text = String::from_utf8(read.content).ok()?;
    (!is_sealed(&text)).then(|| Arc::from(text))
}
