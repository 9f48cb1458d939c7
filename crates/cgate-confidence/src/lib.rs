//! cgate confidence scorer
//!
//! Turns independent, bounded evidence about a candidate change into a
//! deterministic 0-100 confidence score.
//!
//! # Architecture
//!
//! ```text
//! candidate ─┬─ SyntaxChecker (tree-sitter, cached, timed) ─┐
//!            ├─ TestRunner (staged copy, timed) ────────────┤
//!            ├─ extract_signals ── MemorySnapshot ──────────┼─ Evidence ─ ConfidenceScorer ─ ConfidenceMetrics
//!            ├─ exported symbols vs original ───────────────┤
//!            └─ PerformanceRules ───────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - [`EvidenceCollector`]: all I/O and timeouts; failures degrade one metric
//! - [`ConfidenceScorer`]: pure scoring of [`Evidence`]
//! - [`ProjectMemory`]: read-only view of established patterns and history
//! - [`TestRunner`]: pluggable test execution, [`CommandTestRunner`] by default

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod evidence;
pub mod language;
pub mod memory;
pub mod perf;
pub mod risk;
pub mod scorer;
pub mod signals;
pub mod symbols;
pub mod syntax;
pub mod testing;

pub use error::ScoringError;
pub use evidence::{Evidence, EvidenceCollector, ScoringConfig, TestOutcome};
pub use language::SourceLanguage;
pub use memory::{
    EntryOutcome, InMemoryProjectMemory, MemoryAssessment, MemoryEntry, MemorySnapshot, ProjectMemory,
};
pub use perf::{PerformanceHit, PerformanceRuleTable, PerformanceRules};
pub use risk::{is_dependency_manifest, RiskIndicators};
pub use scorer::{ConfidenceMetrics, ConfidenceScorer, MetricKind};
pub use signals::{extract_signals, PatternSummary};
pub use syntax::{check_syntax, check_syntax_until, SyntaxChecker, SyntaxOutcome};
pub use testing::{
    is_test_file, test_candidates, CommandTestRunner, TestCommand, TestReport, TestRequest, TestRunner,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
