//! Testing utilities for the cgate workspace
//!
//! Shared fixtures: on-disk projects, a scripted test runner, and
//! project-memory builders.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cgate_confidence::{
    extract_signals, EntryOutcome, InMemoryProjectMemory, MemoryEntry, PatternSummary, ScoringError, SourceLanguage,
    TestReport, TestRequest, TestRunner,
};
use cgate_policy::{AccessPolicy, AccessPolicyConfig, ProjectPath};
use cgate_sandbox::{Sandbox, SandboxConfig};
use parking_lot::Mutex;
use tempfile::TempDir;

/// A secret the built-in detectors redact
pub const API_KEY_LINE: &str = "const apiKey = \"sk-1234567890abcdef1234567890abcdef\";\n";

/// Content flagged for dynamic evaluation and destructive filesystem calls
pub const MALICIOUS_JS: &str = "eval(\"danger\"); fs.unlink(\"x\")\n";

/// A small, clean TypeScript module
pub const LOGIN_TS: &str = "export function login(user: string): boolean {\n  return user.length > 0;\n}\n";

/// A test file for [`LOGIN_TS`]
pub const LOGIN_TEST_TS: &str =
    "import { login } from './login';\n\ntest('login', () => {\n  expect(login('a')).toBe(true);\n});\n";

/// Project directory that is removed on drop
#[derive(Debug)]
pub struct TempProject {
    dir: TempDir,
}

impl Default for TempProject {
    fn default() -> Self {
        Self::new()
    }
}

impl TempProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// With a file written relative to the root
    #[must_use]
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.write(path, content);
        self
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, path: &str) -> PathBuf {
        self.dir.path().join(path)
    }

    /// Real-tree content, if the file exists
    pub fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.join(path)).ok()
    }

    pub fn policy(&self) -> Arc<AccessPolicy> {
        Arc::new(AccessPolicy::new(self.path(), AccessPolicyConfig::default()).unwrap())
    }

    /// Sandbox with default policy and configuration
    pub async fn sandbox(&self) -> Sandbox {
        Sandbox::initialize(self.policy(), SandboxConfig::default())
            .await
            .unwrap()
    }
}

/// Test runner that replays scripted results
///
/// Queued results are returned in order; once the queue is empty every
/// run returns the fallback report.
#[derive(Debug)]
pub struct ScriptedTestRunner {
    queue: Mutex<VecDeque<Result<TestReport, String>>>,
    fallback: TestReport,
    delay: Option<Duration>,
    requests: Mutex<Vec<TestRequest>>,
}

impl ScriptedTestRunner {
    /// Every run reports `passed` and `failed`
    pub fn new(passed: u32, failed: u32) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: TestReport {
                passed,
                failed,
                output: String::new(),
            },
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every run passes
    pub fn passing() -> Self {
        Self::new(1, 0)
    }

    /// Sleep before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue one result
    #[must_use]
    pub fn then(self, passed: u32, failed: u32) -> Self {
        self.queue.lock().push_back(Ok(TestReport {
            passed,
            failed,
            output: String::new(),
        }));
        self
    }

    /// Queue one runner failure
    #[must_use]
    pub fn then_fail(self, message: &str) -> Self {
        self.queue.lock().push_back(Err(message.to_string()));
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<TestRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run(&self, _sandbox: &Sandbox, request: &TestRequest) -> Result<TestReport, ScoringError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queue.lock().pop_front();
        match next {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(ScoringError::Runner(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Accepted entry carrying `tags`
pub fn accepted(intent: &str, confidence: u8, tags: &[&str]) -> MemoryEntry {
    entry(intent, EntryOutcome::Accepted, confidence, tags)
}

/// Rejected entry carrying `tags`
pub fn rejected(intent: &str, confidence: u8, tags: &[&str]) -> MemoryEntry {
    entry(intent, EntryOutcome::Rejected, confidence, tags)
}

fn entry(intent: &str, outcome: EntryOutcome, confidence: u8, tags: &[&str]) -> MemoryEntry {
    tags.iter()
        .fold(MemoryEntry::new(intent, outcome, confidence), |e, tag| e.with_tag(*tag))
}

/// Patterns as if the project consisted of `source` at `path`
pub fn patterns_from(path: &str, source: &str) -> PatternSummary {
    let path: ProjectPath = path.parse().unwrap();
    extract_signals(source, SourceLanguage::detect(&path))
}

/// Memory holding `entries` and `patterns`
pub fn memory_with(entries: Vec<MemoryEntry>, patterns: PatternSummary) -> Arc<InMemoryProjectMemory> {
    let memory = InMemoryProjectMemory::new();
    for e in entries {
        memory.record(e);
    }
    memory.set_patterns(patterns);
    Arc::new(memory)
}
