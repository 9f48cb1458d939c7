//! Test discovery and execution
//!
//! Tests are located by naming convention and run against a staging copy
//! of the project with candidate content overlaid, so neither the real
//! tree nor the mirror is touched by the test command.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use cgate_policy::ProjectPath;
use cgate_sandbox::Sandbox;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;
use crate::language::SourceLanguage;
use crate::signals::compile_regex;

const JS_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts"];

/// Directories linked into the staging tree instead of copied
const DEPENDENCY_DIRS: &[&str] = &["node_modules", "target", ".venv", "venv", "vendor"];

/// Directories never staged
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn", "__pycache__"];

const OUTPUT_TAIL: usize = 4096;

/// Whether `path` is itself a test file
#[must_use]
pub fn is_test_file(path: &ProjectPath) -> bool {
    let name = path.file_name();
    let ext = path.extension().unwrap_or_default();
    if path.segments().iter().any(|s| s == "__tests__") {
        return true;
    }
    match ext.as_str() {
        "py" => name.starts_with("test_") || path.file_stem().ends_with("_test"),
        "go" => path.file_stem().ends_with("_test"),
        "rs" => path.segments().iter().rev().skip(1).any(|s| s == "tests"),
        e if JS_EXTENSIONS.contains(&e) => {
            let stem = path.file_stem();
            stem.ends_with(".test") || stem.ends_with(".spec")
        }
        _ => false,
    }
}

/// Conventional test locations for `path`, most specific first
///
/// Includes candidates that may not exist; callers filter by presence.
#[must_use]
pub fn test_candidates(path: &ProjectPath) -> Vec<ProjectPath> {
    let Some(ext) = path.extension() else {
        return Vec::new();
    };
    let stem = path.file_stem();
    let dir: Vec<String> = path.parent().map(|p| p.segments().to_vec()).unwrap_or_default();
    let in_dir = |dir: &[String], name: String| {
        let mut segments = dir.to_vec();
        segments.push(name);
        ProjectPath::new(segments).ok()
    };
    let nested = |dir: &[String], sub: &str, name: String| {
        let mut segments = dir.to_vec();
        segments.push(sub.to_string());
        segments.push(name);
        ProjectPath::new(segments).ok()
    };

    let out: Vec<Option<ProjectPath>> = match ext.as_str() {
        e if JS_EXTENSIONS.contains(&e) => vec![
            in_dir(&dir, format!("{stem}.test.{e}")),
            in_dir(&dir, format!("{stem}.spec.{e}")),
            nested(&dir, "__tests__", format!("{stem}.test.{e}")),
            nested(&dir, "__tests__", format!("{stem}.{e}")),
            nested(&[], "tests", format!("{stem}.test.{e}")),
        ],
        "py" => vec![
            in_dir(&dir, format!("test_{stem}.py")),
            in_dir(&dir, format!("{stem}_test.py")),
            nested(&dir, "tests", format!("test_{stem}.py")),
            nested(&[], "tests", format!("test_{stem}.py")),
        ],
        "go" => vec![in_dir(&dir, format!("{stem}_test.go"))],
        "rs" => {
            let crate_root: Vec<String> = dir
                .iter()
                .position(|s| s == "src")
                .map(|idx| dir[..idx].to_vec())
                .unwrap_or_default();
            vec![
                nested(&crate_root, "tests", format!("{stem}.rs")),
                nested(&crate_root, "tests", format!("{stem}_test.rs")),
                nested(&crate_root, "tests", format!("{stem}_tests.rs")),
            ]
        }
        _ => Vec::new(),
    };

    let mut seen = BTreeSet::new();
    out.into_iter()
        .flatten()
        .filter(|p| p != path && seen.insert(p.clone()))
        .collect()
}

/// Tests to run for one candidate
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub language: SourceLanguage,
    pub target: ProjectPath,
    pub tests: Vec<ProjectPath>,
    /// Plaintext written over the staged project before running
    pub overlays: Vec<(ProjectPath, Arc<str>)>,
}

/// Counts reported by a test run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    /// Tail of the combined output
    pub output: String,
}

impl TestReport {
    #[inline]
    #[must_use]
    pub fn total(&self) -> u32 {
        self.passed.saturating_add(self.failed)
    }
}

/// Runs located tests
///
/// The caller enforces the wall-clock budget by dropping the future;
/// implementations must not leave work running when that happens.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, sandbox: &Sandbox, request: &TestRequest) -> Result<TestReport, ScoringError>;
}

/// External test command for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Append the located test files as trailing arguments
    #[serde(default)]
    pub append_files: bool,
}

impl TestCommand {
    #[must_use]
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            append_files: false,
        }
    }

    #[must_use]
    pub fn with_files(mut self) -> Self {
        self.append_files = true;
        self
    }

    /// Conventional runner for a language
    #[must_use]
    pub fn default_for(language: SourceLanguage) -> Option<Self> {
        match language {
            SourceLanguage::Rust => Some(Self::new("cargo", &["test", "--no-fail-fast"])),
            SourceLanguage::TypeScript | SourceLanguage::Tsx | SourceLanguage::JavaScript => {
                Some(Self::new("npx", &["--no-install", "vitest", "run"]).with_files())
            }
            SourceLanguage::Python => Some(Self::new("python", &["-m", "pytest", "-q"]).with_files()),
            SourceLanguage::Go => Some(Self::new("go", &["test", "-v", "./..."])),
            SourceLanguage::Json | SourceLanguage::Yaml | SourceLanguage::Toml => None,
        }
    }
}

/// Runs each language's test command in a staging copy of the project
#[derive(Debug, Clone, Default)]
pub struct CommandTestRunner {
    overrides: HashMap<SourceLanguage, TestCommand>,
}

impl CommandTestRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the command used for `language`
    #[must_use]
    pub fn with_command(mut self, language: SourceLanguage, command: TestCommand) -> Self {
        self.overrides.insert(language, command);
        self
    }

    fn command_for(&self, language: SourceLanguage) -> Option<TestCommand> {
        self.overrides
            .get(&language)
            .cloned()
            .or_else(|| TestCommand::default_for(language))
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, sandbox: &Sandbox, request: &TestRequest) -> Result<TestReport, ScoringError> {
        let command = self
            .command_for(request.language)
            .ok_or_else(|| ScoringError::Runner(format!("no test command for {}", request.language)))?;
        let stage = stage_project(sandbox, &request.overlays).await?;

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(stage.path())
            .env("CI", "1")
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if command.append_files {
            cmd.args(request.tests.iter().map(ProjectPath::to_relative_path));
        }

        tracing::debug!(
            program = %command.program,
            target = %request.target,
            tests = request.tests.len(),
            "running tests"
        );
        let output = cmd
            .output()
            .await
            .map_err(|e| ScoringError::Runner(format!("failed to start '{}': {e}", command.program)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let (passed, failed) = parse_counts(request.language, &text).unwrap_or_else(|| {
            if output.status.success() {
                (1, 0)
            } else {
                (0, 1)
            }
        });
        tracing::info!(target = %request.target, passed, failed, "tests finished");
        Ok(TestReport {
            passed,
            failed,
            output: tail(&text, OUTPUT_TAIL),
        })
    }
}

/// Copy the project into `<state>/tmp/stage-*` and apply overlays
///
/// The state directory and VCS metadata are skipped; dependency
/// directories are symlinked on Unix and skipped elsewhere.
async fn stage_project(
    sandbox: &Sandbox,
    overlays: &[(ProjectPath, Arc<str>)],
) -> Result<tempfile::TempDir, ScoringError> {
    let tmp = sandbox.tmp_dir().to_path_buf();
    let root = sandbox.root().to_path_buf();
    let state_name = sandbox
        .state_dir()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let overlays = overlays.to_vec();

    let staged = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&tmp).map_err(|e| ScoringError::io_error(&tmp, e))?;
        let stage = tempfile::Builder::new()
            .prefix("stage-")
            .tempdir_in(&tmp)
            .map_err(|e| ScoringError::io_error(&tmp, e))?;
        copy_tree(&root, stage.path(), Some(state_name.as_str()))?;
        for (path, content) in &overlays {
            let target = path.under(stage.path());
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ScoringError::io_error(parent, e))?;
            }
            std::fs::write(&target, content.as_bytes()).map_err(|e| ScoringError::io_error(&target, e))?;
        }
        Ok::<_, ScoringError>(stage)
    })
    .await
    .map_err(|e| ScoringError::Runner(format!("staging task failed: {e}")))??;
    Ok(staged)
}

fn copy_tree(from: &Path, to: &Path, skip_top: Option<&str>) -> Result<(), ScoringError> {
    let entries = std::fs::read_dir(from).map_err(|e| ScoringError::io_error(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ScoringError::io_error(from, e))?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy().into_owned();
        if skip_top == Some(name_str.as_str()) || SKIPPED_DIRS.contains(&name_str.as_str()) {
            continue;
        }
        let source = entry.path();
        let target = to.join(&name);
        let file_type = entry.file_type().map_err(|e| ScoringError::io_error(&source, e))?;

        if DEPENDENCY_DIRS.contains(&name_str.as_str()) && file_type.is_dir() {
            link_dependency_dir(&source, &target)?;
        } else if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| ScoringError::io_error(&target, e))?;
            copy_tree(&source, &target, None)?;
        } else if file_type.is_file() {
            std::fs::copy(&source, &target).map_err(|e| ScoringError::io_error(&source, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn link_dependency_dir(source: &Path, target: &Path) -> Result<(), ScoringError> {
    std::os::unix::fs::symlink(source, target).map_err(|e| ScoringError::io_error(target, e))
}

#[cfg(not(unix))]
fn link_dependency_dir(source: &Path, _target: &Path) -> Result<(), ScoringError> {
    tracing::debug!(dir = %source.display(), "dependency directory not staged");
    Ok(())
}

static CARGO_RESULT: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"test result: \w+\. (\d+) passed; (\d+) failed"));
static PASSED: Lazy<Regex> = Lazy::new(|| compile_regex(r"\b(\d+) passed\b"));
static FAILED: Lazy<Regex> = Lazy::new(|| compile_regex(r"\b(\d+) (?:failed|errors?)\b"));
static GO_PASS: Lazy<Regex> = Lazy::new(|| compile_regex(r"(?m)^\s*--- PASS:"));
static GO_FAIL: Lazy<Regex> = Lazy::new(|| compile_regex(r"(?m)^\s*--- FAIL:"));

/// Passed/failed counts from runner output, if the format is recognized
#[must_use]
pub fn parse_counts(language: SourceLanguage, output: &str) -> Option<(u32, u32)> {
    match language {
        SourceLanguage::Rust => {
            let mut found = false;
            let (mut passed, mut failed) = (0u32, 0u32);
            for caps in CARGO_RESULT.captures_iter(output) {
                found = true;
                passed = passed.saturating_add(number(caps.get(1).map(|m| m.as_str())));
                failed = failed.saturating_add(number(caps.get(2).map(|m| m.as_str())));
            }
            found.then_some((passed, failed))
        }
        SourceLanguage::Go => {
            let passed = u32::try_from(GO_PASS.find_iter(output).count()).unwrap_or(u32::MAX);
            let failed = u32::try_from(GO_FAIL.find_iter(output).count()).unwrap_or(u32::MAX);
            (passed.saturating_add(failed) > 0).then_some((passed, failed))
        }
        _ => {
            // Summary is the last line mentioning counts (vitest, jest, pytest).
            let line = output
                .lines()
                .rev()
                .find(|l| PASSED.is_match(l) || FAILED.is_match(l))?;
            let passed = PASSED.captures(line).map_or(0, |c| number(c.get(1).map(|m| m.as_str())));
            let failed = FAILED.captures(line).map_or(0, |c| number(c.get(1).map(|m| m.as_str())));
            Some((passed, failed))
        }
    }
}

fn number(text: Option<&str>) -> u32 {
    text.and_then(|t| t.parse().ok()).unwrap_or(0)
}

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
