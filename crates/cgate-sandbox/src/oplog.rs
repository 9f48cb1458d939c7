//! Append-only operation log
//!
//! Every record chains a SHA-256 over its predecessor, so editing or
//! dropping a line breaks [`OperationLog::verify_integrity`]. When backed by
//! a file, records are appended as JSON Lines and only a bounded tail stays
//! in memory.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::digest::ContentDigest;
use crate::error::SandboxError;

/// Kind of sandbox operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Initialize,
    Write,
    WriteSealed,
    Reset,
    Clean,
    CleanAll,
    Deploy,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Write => "write",
            Self::WriteSealed => "write_sealed",
            Self::Reset => "reset",
            Self::Clean => "clean",
            Self::CleanAll => "clean_all",
            Self::Deploy => "deploy",
        }
    }
}

/// Record to append; chaining fields are filled in by the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationEntry {
    pub kind: OperationKind,
    pub path: Option<String>,
    pub success: bool,
    pub digest: Option<ContentDigest>,
    pub detail: Option<String>,
}

impl OperationEntry {
    /// Successful operation without a path
    #[must_use]
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            path: None,
            success: true,
            digest: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_digest(mut self, digest: ContentDigest) -> Self {
        self.digest = Some(digest);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Persisted, chained record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub seq: u64,
    pub kind: OperationKind,
    pub path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub digest: Option<ContentDigest>,
    pub detail: Option<String>,
    /// Hex SHA-256 of the previous record (zeros for the first)
    pub prev_hash: String,
    /// Hex SHA-256 of this record
    pub hash: String,
}

const GENESIS: [u8; 32] = [0u8; 32];

/// Records kept in memory by default; the file holds the full history
pub const DEFAULT_RETAINED_RECORDS: usize = 256;

#[derive(Debug, Default)]
struct ChainState {
    next_seq: u64,
    head: Option<[u8; 32]>,
    tail: VecDeque<OperationRecord>,
}

impl ChainState {
    fn head(&self) -> [u8; 32] {
        self.head.unwrap_or(GENESIS)
    }

    fn push(&mut self, record: OperationRecord, head: [u8; 32], retain: usize) {
        self.next_seq = record.seq + 1;
        self.head = Some(head);
        self.tail.push_back(record);
        while self.tail.len() > retain {
            self.tail.pop_front();
        }
    }
}

/// Hash-chained operation log
///
/// Only the chain head and a bounded tail of recent records live in
/// memory. A file-backed log is authoritative for the full history.
#[derive(Debug)]
pub struct OperationLog {
    inner: Mutex<ChainState>,
    file: Option<PathBuf>,
    retain: usize,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ChainState::default()),
            file: None,
            retain: DEFAULT_RETAINED_RECORDS,
        }
    }
}

impl OperationLog {
    /// In-memory log
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed log, reloading the chain head
    ///
    /// A log whose chain does not verify is moved aside and a fresh log
    /// started; the broken file is kept for inspection.
    ///
    /// # Errors
    /// [`SandboxError::Io`] if the file cannot be read or moved.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        Self::open_with_retention(path, DEFAULT_RETAINED_RECORDS)
    }

    /// As [`Self::open`], keeping at most `retain` recent records in memory
    ///
    /// # Errors
    /// As [`Self::open`].
    pub fn open_with_retention(path: impl Into<PathBuf>, retain: usize) -> Result<Self, SandboxError> {
        let path = path.into();
        let retain = retain.max(1);
        let state = match replay_file(&path, retain, |_| {}) {
            Ok(state) => state,
            Err(SandboxError::Log(reason)) => {
                let aside = path.with_extension(format!("log.broken-{}", Utc::now().timestamp()));
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    %reason,
                    "operation log chain broken; starting a new log"
                );
                std::fs::rename(&path, &aside).map_err(|e| SandboxError::io_error(&path, e))?;
                ChainState::default()
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            inner: Mutex::new(state),
            file: Some(path),
            retain,
        })
    }

    /// Append a record, persisting it when file-backed
    ///
    /// # Errors
    /// [`SandboxError::Log`] or [`SandboxError::Io`] if persistence fails;
    /// the in-memory chain is left unchanged in that case.
    pub fn append(&self, entry: OperationEntry) -> Result<OperationRecord, SandboxError> {
        let mut guard = self.inner.lock();
        let prev = guard.head();
        let mut record = OperationRecord {
            seq: guard.next_seq,
            kind: entry.kind,
            path: entry.path,
            timestamp: Utc::now(),
            success: entry.success,
            digest: entry.digest,
            detail: entry.detail,
            prev_hash: hex::encode(prev),
            hash: String::new(),
        };
        let hash = compute_hash(&record, &prev);
        record.hash = hex::encode(hash);

        if let Some(path) = &self.file {
            persist(path, &record)?;
        }
        guard.push(record.clone(), hash, self.retain);
        Ok(record)
    }

    /// Most recent records, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<OperationRecord> {
        self.inner.lock().tail.iter().cloned().collect()
    }

    /// Visit every record in order
    ///
    /// Streams the file for a file-backed log; an in-memory log only has
    /// its retained tail.
    ///
    /// # Errors
    /// [`SandboxError::Io`] or [`SandboxError::Log`] if the file cannot be
    /// read or no longer verifies.
    pub fn replay(&self, mut visit: impl FnMut(&OperationRecord)) -> Result<(), SandboxError> {
        let guard = self.inner.lock();
        match &self.file {
            Some(path) => replay_file(path, 1, visit).map(|_| ()),
            None => {
                guard.tail.iter().for_each(&mut visit);
                Ok(())
            }
        }
    }

    /// Total number of records, including those no longer held in memory
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.inner.lock().next_seq).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().next_seq == 0
    }

    /// Verify the hash chain
    ///
    /// A file-backed log re-reads the whole file and checks that it ends at
    /// the in-memory head.
    ///
    /// # Errors
    /// [`SandboxError::Log`] naming the first record that fails.
    pub fn verify_integrity(&self) -> Result<(), SandboxError> {
        let guard = self.inner.lock();
        verify_tail(&guard)?;
        if let Some(path) = &self.file {
            let on_disk = replay_file(path, 1, |_| {})?;
            if on_disk.head != guard.head || on_disk.next_seq != guard.next_seq {
                return Err(SandboxError::Log(format!(
                    "log file ends at record {} but the session is at {}",
                    on_disk.next_seq, guard.next_seq
                )));
            }
        }
        Ok(())
    }
}

/// Stream a log file, verifying the chain as it goes
fn replay_file(
    path: &Path,
    retain: usize,
    mut visit: impl FnMut(&OperationRecord),
) -> Result<ChainState, SandboxError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ChainState::default()),
        Err(e) => return Err(SandboxError::io_error(path, e)),
    };
    let mut state = ChainState::default();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SandboxError::io_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: OperationRecord = serde_json::from_str(&line)
            .map_err(|e| SandboxError::Log(format!("line {} unreadable: {e}", idx + 1)))?;
        let hash = check_link(&record, &state.head())?;
        visit(&record);
        state.push(record, hash, retain);
    }
    Ok(state)
}

fn persist(path: &Path, record: &OperationRecord) -> Result<(), SandboxError> {
    let line = serde_json::to_string(record).map_err(|e| SandboxError::Log(e.to_string()))?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SandboxError::io_error(dir, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SandboxError::io_error(path, e))?;
    writeln!(file, "{line}").map_err(|e| SandboxError::io_error(path, e))
}

fn check_link(record: &OperationRecord, prev: &[u8; 32]) -> Result<[u8; 32], SandboxError> {
    if record.prev_hash != hex::encode(prev) {
        return Err(SandboxError::Log(format!("record {} does not follow its predecessor", record.seq)));
    }
    let expected = compute_hash(record, prev);
    if record.hash != hex::encode(expected) {
        return Err(SandboxError::Log(format!("record {} was modified", record.seq)));
    }
    Ok(expected)
}

fn verify_tail(state: &ChainState) -> Result<(), SandboxError> {
    let Some(first) = state.tail.front() else {
        return Ok(());
    };
    let mut prev = decode_hash(&first.prev_hash)?;
    for record in &state.tail {
        prev = check_link(record, &prev)?;
    }
    if Some(prev) == state.head {
        Ok(())
    } else {
        Err(SandboxError::Log("retained records do not end at the chain head".into()))
    }
}

fn decode_hash(text: &str) -> Result<[u8; 32], SandboxError> {
    let raw = hex::decode(text).map_err(|e| SandboxError::Log(e.to_string()))?;
    raw.try_into()
        .map_err(|_| SandboxError::Log("stored hash is not 32 bytes".into()))
}

fn compute_hash(record: &OperationRecord, prev: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(record.seq.to_le_bytes());
    hasher.update(record.kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(record.path.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(record.timestamp.to_rfc3339().as_bytes());
    hasher.update([u8::from(record.success)]);
    if let Some(digest) = &record.digest {
        hasher.update(digest.as_bytes());
    }
    hasher.update([0]);
    hasher.update(record.detail.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(prev);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_chains_records() {
        let log = OperationLog::in_memory();
        let first = log.append(OperationEntry::new(OperationKind::Initialize)).unwrap();
        let second = log
            .append(
                OperationEntry::new(OperationKind::Write)
                    .with_path("src/a.rs")
                    .with_digest(ContentDigest::compute(b"a")),
            )
            .unwrap();

        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(second.prev_hash, first.hash);
        assert!(log.verify_integrity().is_ok());
    }

    #[test]
    fn tampering_detected() {
        let log = OperationLog::in_memory();
        log.append(OperationEntry::new(OperationKind::Write).with_path("a.rs")).unwrap();
        log.append(OperationEntry::new(OperationKind::Write).with_path("b.rs")).unwrap();

        log.inner.lock().tail[0].path = Some("evil.rs".into());
        assert!(log.verify_integrity().is_err());
    }

    #[test]
    fn memory_keeps_bounded_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operations.log");
        let log = OperationLog::open_with_retention(&path, 4).unwrap();
        for i in 0..10 {
            log.append(OperationEntry::new(OperationKind::Write).with_path(format!("f{i}.rs")))
                .unwrap();
        }

        let kept: Vec<u64> = log.records().iter().map(|r| r.seq).collect();
        assert_eq!(kept, vec![6, 7, 8, 9]);
        assert_eq!(log.len(), 10);
        assert!(log.verify_integrity().is_ok());

        let mut seen = Vec::new();
        log.replay(|r| seen.push(r.seq)).unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        let reopened = OperationLog::open_with_retention(&path, 4).unwrap();
        assert_eq!(reopened.len(), 10);
        assert_eq!(reopened.records().len(), 4);
        assert_eq!(reopened.append(OperationEntry::new(OperationKind::Reset)).unwrap().seq, 10);
    }

    #[test]
    fn file_edits_after_open_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operations.log");
        let log = OperationLog::open(&path).unwrap();
        log.append(OperationEntry::new(OperationKind::Write).with_path("a.rs")).unwrap();
        log.append(OperationEntry::new(OperationKind::Write).with_path("b.rs")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap().replace("a.rs", "z.rs");
        std::fs::write(&path, text).unwrap();
        assert!(matches!(log.verify_integrity(), Err(SandboxError::Log(_))));
    }

    #[test]
    fn file_backed_log_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operations.log");
        {
            let log = OperationLog::open(&path).unwrap();
            log.append(OperationEntry::new(OperationKind::Initialize)).unwrap();
            log.append(OperationEntry::new(OperationKind::Write).with_path("x.rs").failed())
                .unwrap();
        }
        let log = OperationLog::open(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.verify_integrity().is_ok());
        let next = log.append(OperationEntry::new(OperationKind::Reset)).unwrap();
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn broken_file_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operations.log");
        {
            let log = OperationLog::open(&path).unwrap();
            log.append(OperationEntry::new(OperationKind::Write).with_path("a.rs")).unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap().replace("a.rs", "b.rs");
        std::fs::write(&path, text).unwrap();

        let log = OperationLog::open(&path).unwrap();
        assert!(log.is_empty());
        let moved = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|e| e.file_name().to_string_lossy().contains("broken"));
        assert!(moved);
    }
}
