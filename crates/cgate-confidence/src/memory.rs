//! Project memory interface
//!
//! Memory is an external, read-mostly store of established patterns and
//! prior decisions. Scoring consults it through [`ProjectMemory`] and
//! freezes one view per evaluation in a [`MemorySnapshot`], so a store
//! updated concurrently never changes a score mid-pass.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;
use crate::signals::PatternSummary;

/// What became of a prior change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Accepted,
    Rejected,
    Reverted,
}

impl EntryOutcome {
    #[inline]
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Rejected | Self::Reverted)
    }
}

/// One prior decision recorded in project memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub intent: String,
    pub outcome: EntryOutcome,
    pub confidence: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MemoryEntry {
    #[must_use]
    pub fn new(intent: impl Into<String>, outcome: EntryOutcome, confidence: u8) -> Self {
        Self {
            intent: intent.into(),
            outcome,
            confidence: confidence.min(100),
            timestamp: Utc::now(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Read-only view of project memory
#[async_trait]
pub trait ProjectMemory: Send + Sync {
    /// Architecture, naming, and style aggregates the project has settled on
    async fn established_patterns(&self) -> Result<PatternSummary, ScoringError>;

    /// Up to `limit` prior entries with an intent similar to `intent`
    async fn find_similar_entries(&self, intent: &str, limit: usize) -> Result<Vec<MemoryEntry>, ScoringError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MemoryState {
    patterns: PatternSummary,
    entries: Vec<MemoryEntry>,
}

/// Process-local memory store
///
/// Safe to update from a watcher task while evaluations read it.
#[derive(Debug, Default)]
pub struct InMemoryProjectMemory {
    state: RwLock<MemoryState>,
}

impl InMemoryProjectMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document `{ "patterns": {...}, "entries": [...] }`
    ///
    /// # Errors
    /// [`ScoringError::Memory`] if the document does not parse.
    pub fn from_json_str(source: &str) -> Result<Self, ScoringError> {
        let state: MemoryState = serde_json::from_str(source).map_err(|e| ScoringError::Memory(e.to_string()))?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Load from a JSON file
    ///
    /// # Errors
    /// IO failure or [`ScoringError::Memory`].
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ScoringError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ScoringError::io_error(path, e))?;
        Self::from_json_str(&source)
    }

    /// Append a prior decision
    pub fn record(&self, entry: MemoryEntry) {
        self.state.write().entries.push(entry);
    }

    /// Replace the established patterns
    pub fn set_patterns(&self, patterns: PatternSummary) {
        self.state.write().patterns = patterns;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

#[async_trait]
impl ProjectMemory for InMemoryProjectMemory {
    async fn established_patterns(&self) -> Result<PatternSummary, ScoringError> {
        Ok(self.state.read().patterns)
    }

    async fn find_similar_entries(&self, intent: &str, limit: usize) -> Result<Vec<MemoryEntry>, ScoringError> {
        let query = tokens(intent);
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        let mut scored: Vec<(usize, &MemoryEntry)> = state
            .entries
            .iter()
            .filter_map(|entry| {
                let mut words = tokens(&entry.intent);
                for tag in &entry.tags {
                    words.extend(tokens(tag));
                }
                let overlap = query.intersection(&words).count();
                (overlap > 0).then_some((overlap, entry))
            })
            .collect();
        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .cmp(a_score)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.intent.cmp(&b.intent))
        });
        Ok(scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Counts derived from comparing a candidate against similar entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAssessment {
    pub similar: u32,
    /// Repeats a failed approach, or departs from an accepted one
    pub contradictions: u32,
    /// Departs from a failed approach
    pub improvements: u32,
    /// Follows an accepted approach
    pub agreements: u32,
}

/// Fixed view of memory for one evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub patterns: PatternSummary,
    pub similar: Vec<MemoryEntry>,
}

impl MemorySnapshot {
    /// Snapshot with no patterns and no history
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Query `memory` once; lookup failures degrade to an empty view
    pub async fn capture(memory: &dyn ProjectMemory, intent: &str, limit: usize) -> Self {
        let patterns = memory.established_patterns().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "established patterns unavailable");
            PatternSummary::default()
        });
        let similar = memory
            .find_similar_entries(intent, limit)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "similar entries unavailable");
                Vec::new()
            });
        Self { patterns, similar }
    }

    /// Compare candidate tags (see [`PatternSummary::tags`]) with each similar entry
    #[must_use]
    pub fn assess(&self, candidate_tags: &[String]) -> MemoryAssessment {
        let mut out = MemoryAssessment {
            similar: u32::try_from(self.similar.len()).unwrap_or(u32::MAX),
            ..MemoryAssessment::default()
        };
        for entry in &self.similar {
            let overlap = entry.tags.iter().any(|t| candidate_tags.contains(t));
            let conflict = entry
                .tags
                .iter()
                .any(|t| candidate_tags.iter().any(|c| conflicts(t, c)));
            match (entry.outcome.is_failure(), overlap, conflict) {
                (false, _, true) | (true, true, _) => out.contradictions += 1,
                (false, true, false) => out.agreements += 1,
                (true, false, true) => out.improvements += 1,
                _ => {}
            }
        }
        out
    }
}

/// Same dimension, different value (`module:es_modules` vs `module:common_js`)
fn conflicts(a: &str, b: &str) -> bool {
    match (a.split_once(':'), b.split_once(':')) {
        (Some((da, va)), Some((db, vb))) => da == db && va != vb,
        _ => false,
    }
}
