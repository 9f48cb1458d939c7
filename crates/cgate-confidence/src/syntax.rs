//! Syntax validation
//!
//! Code languages parse with tree-sitter; diagnostics are error and missing
//! nodes. Data formats parse with their serde crates. Outcomes are cached by
//! (language, content digest), so re-evaluating unchanged content never
//! re-parses and always sees the same outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cgate_sandbox::ContentDigest;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::language::SourceLanguage;

/// Result of a syntax check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyntaxOutcome {
    Clean,
    Diagnostics { count: u32 },
    /// Non-empty content in a language without a parser
    Unsupported,
    Empty,
    TimedOut,
    /// Parser could not run at all
    Failed,
}

/// Parse `content` synchronously
#[must_use]
pub fn check_syntax(content: &str, language: Option<SourceLanguage>) -> SyntaxOutcome {
    check_syntax_until(content, language, None)
}

/// Parse `content`, abandoning a tree-sitter parse once `deadline` passes
///
/// Data formats parse in one linear pass and are not interrupted.
#[must_use]
pub fn check_syntax_until(content: &str, language: Option<SourceLanguage>, deadline: Option<Instant>) -> SyntaxOutcome {
    if content.trim().is_empty() {
        return SyntaxOutcome::Empty;
    }
    let Some(language) = language else {
        return SyntaxOutcome::Unsupported;
    };
    let count = match language {
        SourceLanguage::Json => u32::from(serde_json::from_str::<serde_json::Value>(content).is_err()),
        SourceLanguage::Yaml => u32::from(serde_yaml::from_str::<serde_yaml::Value>(content).is_err()),
        SourceLanguage::Toml => u32::from(toml::from_str::<toml::Table>(content).is_err()),
        code => match parse_tree(content, code, deadline) {
            ParseResult::Parsed(tree) => count_diagnostics(tree.root_node()),
            ParseResult::Cancelled => return SyntaxOutcome::TimedOut,
            ParseResult::Failed => return SyntaxOutcome::Failed,
        },
    };
    if count == 0 {
        SyntaxOutcome::Clean
    } else {
        SyntaxOutcome::Diagnostics { count }
    }
}

pub(crate) enum ParseResult {
    Parsed(tree_sitter::Tree),
    Cancelled,
    Failed,
}

/// Run tree-sitter, stopping the parse itself when the deadline passes
pub(crate) fn parse_tree(content: &str, language: SourceLanguage, deadline: Option<Instant>) -> ParseResult {
    let Some(grammar) = language.tree_sitter_language() else {
        return ParseResult::Failed;
    };
    let mut parser = tree_sitter::Parser::new();
    if let Err(e) = parser.set_language(&grammar) {
        tracing::warn!(%language, error = %e, "parser init failed");
        return ParseResult::Failed;
    }

    let bytes = content.as_bytes();
    let mut expired = false;
    let mut past_deadline = |_: &tree_sitter::ParseState| {
        expired = deadline.is_some_and(|d| Instant::now() >= d);
        expired
    };
    let tree = parser.parse_with_options(
        &mut |offset, _| bytes.get(offset..).unwrap_or_default(),
        None,
        Some(tree_sitter::ParseOptions::new().progress_callback(&mut past_deadline)),
    );
    match tree {
        Some(tree) => ParseResult::Parsed(tree),
        None if expired => ParseResult::Cancelled,
        None => ParseResult::Failed,
    }
}

fn count_diagnostics(node: tree_sitter::Node<'_>) -> u32 {
    if node.is_error() || node.is_missing() {
        return 1;
    }
    if !node.has_error() {
        return 0;
    }
    let mut cursor = node.walk();
    node.children(&mut cursor).map(count_diagnostics).sum()
}

/// Cached, time-bounded syntax checker
#[derive(Debug, Clone)]
pub struct SyntaxChecker {
    cache: Cache<(SourceLanguage, ContentDigest), SyntaxOutcome>,
    timeout: Duration,
}

impl SyntaxChecker {
    /// Create checker with cache capacity and per-parse timeout
    #[must_use]
    pub fn new(capacity: u64, timeout: Duration) -> Self {
        Self {
            cache: Cache::new(capacity),
            timeout,
        }
    }

    /// Check content, parsing on a blocking thread under the timeout
    ///
    /// The parse carries the same deadline, so an abandoned task stops
    /// instead of running on. A timeout yields [`SyntaxOutcome::TimedOut`]
    /// and is not cached.
    pub async fn check(&self, content: &Arc<str>, language: Option<SourceLanguage>) -> SyntaxOutcome {
        let Some(language) = language else {
            return check_syntax(content, None);
        };
        if content.trim().is_empty() {
            return SyntaxOutcome::Empty;
        }
        let key = (language, ContentDigest::compute(content.as_bytes()));
        if let Some(hit) = self.cache.get(&key).await {
            return hit;
        }

        let owned = Arc::clone(content);
        let deadline = Instant::now().checked_add(self.timeout);
        let task = tokio::task::spawn_blocking(move || check_syntax_until(&owned, Some(language), deadline));
        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(SyntaxOutcome::TimedOut)) => {
                tracing::warn!(%language, timeout = ?self.timeout, "parse cancelled at deadline");
                return SyntaxOutcome::TimedOut;
            }
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => {
                tracing::warn!(%language, error = %join, "parse task failed");
                SyntaxOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(%language, timeout = ?self.timeout, "parse timed out");
                return SyntaxOutcome::TimedOut;
            }
        };
        self.cache.insert(key, outcome).await;
        outcome
    }

    /// Number of cached outcomes
    #[must_use]
    pub fn cached_entries(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_clean_and_broken() {
        let rs = Some(SourceLanguage::Rust);
        assert_eq!(check_syntax("fn main() { let x = 1; }\n", rs), SyntaxOutcome::Clean);
        assert!(matches!(
            check_syntax("fn main( { let x = ; }\n", rs),
            SyntaxOutcome::Diagnostics { .. }
        ));
    }

    #[test]
    fn typescript_and_python() {
        assert_eq!(
            check_syntax("export function add(a: number, b: number): number { return a + b; }\n", Some(SourceLanguage::TypeScript)),
            SyntaxOutcome::Clean
        );
        assert_eq!(
            check_syntax("def add(a, b):\n    return a + b\n", Some(SourceLanguage::Python)),
            SyntaxOutcome::Clean
        );
        assert!(matches!(
            check_syntax("def add(a, b)\n    return a +\n", Some(SourceLanguage::Python)),
            SyntaxOutcome::Diagnostics { .. }
        ));
    }

    #[test]
    fn data_formats() {
        assert_eq!(check_syntax("{\"a\": 1}", Some(SourceLanguage::Json)), SyntaxOutcome::Clean);
        assert_eq!(
            check_syntax("{\"a\": }", Some(SourceLanguage::Json)),
            SyntaxOutcome::Diagnostics { count: 1 }
        );
        assert_eq!(check_syntax("a = 1\n", Some(SourceLanguage::Toml)), SyntaxOutcome::Clean);
        assert_eq!(
            check_syntax("a = = 1\n", Some(SourceLanguage::Toml)),
            SyntaxOutcome::Diagnostics { count: 1 }
        );
    }

    #[test]
    fn empty_and_unsupported() {
        assert_eq!(check_syntax("  \n", Some(SourceLanguage::Rust)), SyntaxOutcome::Empty);
        assert_eq!(check_syntax("", None), SyntaxOutcome::Empty);
        assert_eq!(check_syntax("int main() {}", None), SyntaxOutcome::Unsupported);
    }

    fn long_rust_source() -> String {
        (0..20_000).map(|i| format!("fn f{i}(a: u32) -> u32 {{ a + {i} }}\n")).collect()
    }

    #[test]
    fn expired_deadline_cancels_parse() {
        let source = long_rust_source();
        assert_eq!(
            check_syntax_until(&source, Some(SourceLanguage::Rust), Some(Instant::now())),
            SyntaxOutcome::TimedOut
        );
        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(check_syntax_until("fn f() {}\n", Some(SourceLanguage::Rust), Some(later)), SyntaxOutcome::Clean);
    }

    #[tokio::test]
    async fn checker_times_out_without_caching() {
        let checker = SyntaxChecker::new(16, Duration::ZERO);
        let content: Arc<str> = Arc::from(long_rust_source());
        assert_eq!(checker.check(&content, Some(SourceLanguage::Rust)).await, SyntaxOutcome::TimedOut);
        assert_eq!(checker.check(&content, Some(SourceLanguage::Rust)).await, SyntaxOutcome::TimedOut);
        checker.cache.run_pending_tasks().await;
        assert_eq!(checker.cached_entries(), 0);
    }

    #[tokio::test]
    async fn checker_caches_by_digest() {
        let checker = SyntaxChecker::new(16, Duration::from_secs(5));
        let content: Arc<str> = Arc::from("fn f() {}\n");
        let first = checker.check(&content, Some(SourceLanguage::Rust)).await;
        let second = checker.check(&content, Some(SourceLanguage::Rust)).await;
        assert_eq!(first, SyntaxOutcome::Clean);
        assert_eq!(first, second);
        checker.cache.run_pending_tasks().await;
        assert_eq!(checker.cached_entries(), 1);
    }
}
