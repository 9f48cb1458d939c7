//! Sandbox isolation layer
//!
//! Mediates every read and write between the project root and its mirror
//! under `<root>/<state_dir>/mirror`. Writes land in the mirror only;
//! [`Sandbox::promote`] is the single path that writes into the real tree.
//!
//! Concurrency: mutating operations hold the session lock exclusively and
//! queue behind each other; reads share it. [`Sandbox::reset`] and
//! [`Sandbox::clean`] never wait: they fail with [`SandboxError::Busy`] if
//! anything is in flight.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cgate_policy::{AccessPolicy, ProjectPath};
use cgate_security::ContentCipher;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::digest::ContentDigest;
use crate::error::SandboxError;
use crate::oplog::{OperationEntry, OperationKind, OperationLog, OperationRecord};

/// Sandbox section of the project configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// State directory name under the project root
    pub state_dir: String,
    /// Project files copied into the mirror for evaluation context
    pub context_files: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let files = [
            "Cargo.toml",
            "Cargo.lock",
            "package.json",
            "package-lock.json",
            "tsconfig.json",
            "pyproject.toml",
            "requirements.txt",
            "go.mod",
            "go.sum",
            ".editorconfig",
        ];
        Self {
            state_dir: ".cgate".to_string(),
            context_files: files.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl SandboxConfig {
    #[must_use]
    pub fn with_state_dir(mut self, name: impl Into<String>) -> Self {
        self.state_dir = name.into();
        self
    }

    #[must_use]
    pub fn with_context_file(mut self, name: impl Into<String>) -> Self {
        self.context_files.push(name.into());
        self
    }
}

/// Where a read was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    Mirror,
    Project,
}

/// Content returned by [`Sandbox::read_file`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRead {
    pub path: ProjectPath,
    pub content: Vec<u8>,
    pub source: ReadSource,
}

/// Receipt for a mirror write or promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub path: ProjectPath,
    pub digest: ContentDigest,
    pub bytes: u64,
    pub sealed: bool,
}

/// Isolated mirror of one project
#[derive(Debug)]
pub struct Sandbox {
    policy: Arc<AccessPolicy>,
    config: SandboxConfig,
    state_dir: PathBuf,
    mirror_dir: PathBuf,
    tmp_dir: PathBuf,
    log: OperationLog,
    lock: RwLock<()>,
    /// Candidates written since the last reset
    written: Mutex<BTreeSet<ProjectPath>>,
}

impl Sandbox {
    /// Log file name inside the state directory
    pub const LOG_FILE: &'static str = "operations.log";

    /// Create or reuse the mirror for the policy's root
    ///
    /// Idempotent: existing mirror content and log records are kept;
    /// context files are copied only where the mirror lacks them.
    ///
    /// # Errors
    /// [`SandboxError::Io`] if the state directory cannot be prepared.
    pub async fn initialize(policy: Arc<AccessPolicy>, config: SandboxConfig) -> Result<Self, SandboxError> {
        let state_dir = policy.root().join(&config.state_dir);
        let mirror_dir = state_dir.join("mirror");
        let tmp_dir = state_dir.join("tmp");
        create_dir(&mirror_dir).await?;

        let log = OperationLog::open(state_dir.join(Self::LOG_FILE))?;
        let mut written = BTreeSet::new();
        log.replay(|record| track_written(&mut written, record))?;
        let sandbox = Self {
            policy,
            config,
            state_dir,
            mirror_dir,
            tmp_dir,
            log,
            lock: RwLock::new(()),
            written: Mutex::new(written),
        };

        let copied = sandbox.copy_context(false).await?;
        sandbox.log.append(
            OperationEntry::new(OperationKind::Initialize).with_detail(format!("{copied} context files copied")),
        )?;
        tracing::info!(
            root = %sandbox.policy.root().display(),
            mirror = %sandbox.mirror_dir.display(),
            copied,
            "sandbox initialized"
        );
        Ok(sandbox)
    }

    /// Project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        self.policy.root()
    }

    /// State directory (`<root>/.cgate` by default)
    #[inline]
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Mirror directory
    #[inline]
    #[must_use]
    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    /// Scratch directory for temporary artifacts, emptied by [`Self::clean`]
    #[inline]
    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Access policy in force for this session
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &Arc<AccessPolicy> {
        &self.policy
    }

    /// Operation log
    #[inline]
    #[must_use]
    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Mirror location for a project path
    #[inline]
    #[must_use]
    pub fn mirror_path(&self, path: &ProjectPath) -> PathBuf {
        path.under(&self.mirror_dir)
    }

    /// Write candidate content into the mirror
    ///
    /// # Errors
    /// - [`SandboxError::Policy`] for path or policy violations (nothing written)
    /// - [`SandboxError::Io`] for other failures
    pub async fn write_file(&self, path: impl AsRef<Path>, content: &[u8]) -> Result<WriteReceipt, SandboxError> {
        let resolved = self.checked(path.as_ref(), content.len())?;
        let digest = ContentDigest::compute(content);
        self.write_mirror(resolved, content, digest, false, OperationKind::Write)
            .await
    }

    /// Seal content and write the envelope into the mirror
    ///
    /// Size and policy checks apply to the plaintext. If sealing fails
    /// nothing is written.
    ///
    /// # Errors
    /// As [`Self::write_file`], plus [`SandboxError::Crypto`].
    pub async fn write_file_sealed(
        &self,
        path: impl AsRef<Path>,
        content: &[u8],
        cipher: &ContentCipher,
    ) -> Result<WriteReceipt, SandboxError> {
        let resolved = self.checked(path.as_ref(), content.len())?;
        let digest = ContentDigest::compute(content);
        let sealed = match cipher.seal(content) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.log.append(
                    OperationEntry::new(OperationKind::WriteSealed)
                        .with_path(resolved.to_string())
                        .with_detail("sealing failed")
                        .failed(),
                )?;
                return Err(e.into());
            }
        };
        self.write_mirror(resolved, sealed.as_bytes(), digest, true, OperationKind::WriteSealed)
            .await
    }

    fn checked(&self, path: &Path, len: usize) -> Result<ProjectPath, SandboxError> {
        match self.policy.check_write(path, len as u64) {
            Ok(resolved) => Ok(resolved),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "write rejected");
                self.log.append(
                    OperationEntry::new(OperationKind::Write)
                        .with_path(path.display().to_string())
                        .with_detail(err.to_string())
                        .failed(),
                )?;
                Err(err.into())
            }
        }
    }

    async fn write_mirror(
        &self,
        resolved: ProjectPath,
        bytes: &[u8],
        digest: ContentDigest,
        sealed: bool,
        kind: OperationKind,
    ) -> Result<WriteReceipt, SandboxError> {
        let _guard = self.lock.write().await;
        let target = self.mirror_path(&resolved);
        if let Some(parent) = target.parent() {
            create_dir(parent).await?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| SandboxError::io_error(&target, e))?;

        let record = self.log.append(
            OperationEntry::new(kind)
                .with_path(resolved.to_string())
                .with_digest(digest),
        )?;
        track_written(&mut self.written.lock(), &record);
        tracing::debug!(path = %resolved, digest = %digest.short(), sealed, "mirror write");
        Ok(WriteReceipt {
            path: resolved,
            digest,
            bytes: bytes.len() as u64,
            sealed,
        })
    }

    /// Read from the mirror, falling back to the real tree
    ///
    /// # Errors
    /// Policy rejection, [`SandboxError::NotFound`], or IO failure.
    pub async fn read_file(&self, path: impl AsRef<Path>) -> Result<FileRead, SandboxError> {
        let resolved = self.policy.resolve(path.as_ref())?;
        self.policy.check_path(&resolved)?;
        let _guard = self.lock.read().await;

        let mirror = self.mirror_path(&resolved);
        if let Some(content) = read_optional(&mirror).await? {
            return Ok(FileRead {
                path: resolved,
                content,
                source: ReadSource::Mirror,
            });
        }
        let original = self.policy.absolute(&resolved);
        match read_optional(&original).await? {
            Some(content) => Ok(FileRead {
                path: resolved,
                content,
                source: ReadSource::Project,
            }),
            None => Err(SandboxError::NotFound(resolved.to_string())),
        }
    }

    /// Read the real-tree version only, if any
    ///
    /// # Errors
    /// Policy rejection or IO failure other than not-found.
    pub async fn read_original(&self, path: &ProjectPath) -> Result<Option<Vec<u8>>, SandboxError> {
        self.policy.check_path(path)?;
        let _guard = self.lock.read().await;
        read_optional(&self.policy.absolute(path)).await
    }

    /// Whether the mirror holds a candidate for `path`
    pub async fn in_mirror(&self, path: &ProjectPath) -> bool {
        tokio::fs::metadata(self.mirror_path(path))
            .await
            .is_ok_and(|m| m.is_file())
    }

    /// Candidate files written since the last reset, still present in the mirror
    pub async fn written_files(&self) -> Vec<ProjectPath> {
        let paths: Vec<ProjectPath> = self.written.lock().iter().cloned().collect();
        let mut present = Vec::with_capacity(paths.len());
        for path in paths {
            if self.in_mirror(&path).await {
                present.push(path);
            }
        }
        present
    }

    /// Discard the mirror and resynchronize context from the real tree
    ///
    /// # Errors
    /// [`SandboxError::Busy`] if any operation is in flight; IO failure.
    pub async fn reset(&self) -> Result<(), SandboxError> {
        let _guard = self.lock.try_write().map_err(|_| SandboxError::Busy("reset"))?;
        remove_dir(&self.mirror_dir).await?;
        remove_dir(&self.tmp_dir).await?;
        create_dir(&self.mirror_dir).await?;
        let copied = self.copy_context(true).await?;
        let record = self.log.append(
            OperationEntry::new(OperationKind::Reset).with_detail(format!("{copied} context files copied")),
        )?;
        track_written(&mut self.written.lock(), &record);
        tracing::info!(mirror = %self.mirror_dir.display(), copied, "sandbox reset");
        Ok(())
    }

    /// Remove temporary artifacts; `all` removes the whole mirror
    ///
    /// # Errors
    /// [`SandboxError::Busy`] if any operation is in flight; IO failure.
    pub async fn clean(&self, all: bool) -> Result<(), SandboxError> {
        let _guard = self.lock.try_write().map_err(|_| SandboxError::Busy("clean"))?;
        remove_dir(&self.tmp_dir).await?;
        let kind = if all {
            remove_dir(&self.mirror_dir).await?;
            OperationKind::CleanAll
        } else {
            OperationKind::Clean
        };
        let record = self.log.append(OperationEntry::new(kind))?;
        track_written(&mut self.written.lock(), &record);
        tracing::info!(all, "sandbox cleaned");
        Ok(())
    }

    /// Write content into the real tree
    ///
    /// Re-runs the full policy check immediately before writing. The write
    /// goes through a temporary sibling file and a rename, so an interrupted
    /// promotion never leaves a partial file in place.
    ///
    /// # Errors
    /// Policy rejection (nothing written) or IO failure.
    pub async fn promote(&self, path: &ProjectPath, content: &[u8]) -> Result<WriteReceipt, SandboxError> {
        let resolved = match self.policy.check_write(path.to_relative_path(), content.len() as u64) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.log.append(
                    OperationEntry::new(OperationKind::Deploy)
                        .with_path(path.to_string())
                        .with_detail(err.to_string())
                        .failed(),
                )?;
                return Err(err.into());
            }
        };
        let _guard = self.lock.write().await;
        let target = self.policy.absolute(&resolved);
        let digest = ContentDigest::compute(content);
        atomic_write(&target, content).await?;

        self.log.append(
            OperationEntry::new(OperationKind::Deploy)
                .with_path(resolved.to_string())
                .with_digest(digest),
        )?;
        tracing::info!(path = %resolved, digest = %digest.short(), "promoted to project tree");
        Ok(WriteReceipt {
            path: resolved,
            digest,
            bytes: content.len() as u64,
            sealed: false,
        })
    }

    /// Most recent log records
    #[must_use]
    pub fn operations(&self) -> Vec<OperationRecord> {
        self.log.records()
    }

    async fn copy_context(&self, overwrite: bool) -> Result<usize, SandboxError> {
        let mut copied = 0;
        for name in &self.config.context_files {
            let Ok(path) = self.policy.resolve(name) else {
                tracing::warn!(file = %name, "context file outside project root skipped");
                continue;
            };
            let source = self.policy.absolute(&path);
            let Ok(meta) = tokio::fs::metadata(&source).await else {
                continue;
            };
            if !meta.is_file() || meta.len() > self.policy.max_file_size() {
                continue;
            }
            let target = self.mirror_path(&path);
            if !overwrite && tokio::fs::metadata(&target).await.is_ok() {
                continue;
            }
            if let Some(parent) = target.parent() {
                create_dir(parent).await?;
            }
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| SandboxError::io_error(&source, e))?;
            copied += 1;
        }
        Ok(copied)
    }
}

async fn create_dir(path: &Path) -> Result<(), SandboxError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| SandboxError::io_error(path, e))
}

async fn remove_dir(path: &Path) -> Result<(), SandboxError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SandboxError::io_error(path, e)),
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, SandboxError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SandboxError::io_error(path, e)),
    }
}

async fn atomic_write(target: &Path, content: &[u8]) -> Result<(), SandboxError> {
    let dir = target
        .parent()
        .ok_or_else(|| SandboxError::NotFound(target.display().to_string()))?;
    create_dir(dir).await?;

    let mut suffix = [0u8; 6];
    rand::rng().fill_bytes(&mut suffix);
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.cgate-{}", hex::encode(suffix)));

    if let Err(e) = tokio::fs::write(&tmp, content).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SandboxError::io_error(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SandboxError::io_error(target, e));
    }
    Ok(())
}

fn track_written(written: &mut BTreeSet<ProjectPath>, record: &OperationRecord) {
    match record.kind {
        OperationKind::Reset | OperationKind::CleanAll => written.clear(),
        OperationKind::Write | OperationKind::WriteSealed if record.success => {
            if let Some(path) = record.path.as_deref().and_then(|p| p.parse().ok()) {
                written.insert(path);
            }
        }
        _ => {}
    }
}
