//! Access policy
//!
//! Immutable for the lifetime of a sandbox session. Every read, write, and
//! deploy resolves its path through [`AccessPolicy::resolve`] and checks the
//! payload through [`AccessPolicy::check_write`].

use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyRule};
use crate::path::ProjectPath;

/// Default size ceiling (1 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Serializable policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicyConfig {
    /// Allowed file extensions (lowercase, without dot)
    pub allowed_extensions: BTreeSet<String>,
    /// Extension-less file names that are still allowed
    pub allowed_file_names: BTreeSet<String>,
    /// Blocked glob patterns, matched against the root-relative path
    pub blocked_patterns: Vec<String>,
    /// Maximum content size in bytes
    pub max_file_size: u64,
    /// Glob patterns whose content is always sealed at rest
    pub always_seal_patterns: Vec<String>,
}

impl AccessPolicyConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With size ceiling
    #[inline]
    #[must_use]
    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    /// With an additional allowed extension
    #[must_use]
    pub fn with_extension(mut self, ext: impl AsRef<str>) -> Self {
        self.allowed_extensions
            .insert(ext.as_ref().trim_start_matches('.').to_ascii_lowercase());
        self
    }

    /// With an additional blocked pattern
    #[must_use]
    pub fn with_blocked_pattern(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if !self.blocked_patterns.contains(&pattern) {
            self.blocked_patterns.push(pattern);
        }
        self
    }

    /// With an additional always-seal pattern
    #[must_use]
    pub fn with_seal_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.always_seal_patterns.push(pattern.into());
        self
    }
}

impl Default for AccessPolicyConfig {
    fn default() -> Self {
        let extensions = [
            "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "java", "kt", "c", "h",
            "cpp", "hpp", "cc", "cs", "rb", "php", "swift", "json", "yaml", "yml", "toml", "md",
            "txt", "css", "scss", "html", "sql", "graphql", "proto", "lock",
        ];
        let names = ["Makefile", "Dockerfile", "LICENSE", ".gitignore", ".editorconfig"];
        let blocked = [
            "**/.git/**",
            "**/node_modules/**",
            "**/target/**",
            "**/.env",
            "**/.env.*",
            "**/.ssh/**",
            "**/id_rsa*",
            "**/*.pem",
            ".cgate/**",
        ];
        Self {
            allowed_extensions: extensions.iter().map(|s| (*s).to_string()).collect(),
            allowed_file_names: names.iter().map(|s| (*s).to_string()).collect(),
            blocked_patterns: blocked.iter().map(|s| (*s).to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            always_seal_patterns: vec!["**/secrets/**".to_string(), "**/*.secret.*".to_string()],
        }
    }
}

/// Compiled access policy bound to one project root
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    /// Canonical project root
    root: PathBuf,
    /// Root exactly as supplied (may differ from `root` through symlinks)
    given_root: PathBuf,
    config: AccessPolicyConfig,
    blocked: GlobSet,
    seal: GlobSet,
}

impl AccessPolicy {
    /// Compile a policy for `root`
    ///
    /// # Errors
    /// - [`PolicyError::RootUnavailable`] if the root cannot be canonicalized
    /// - [`PolicyError::InvalidPattern`] if a glob does not compile
    pub fn new(root: impl AsRef<Path>, config: AccessPolicyConfig) -> Result<Self, PolicyError> {
        let given_root = root.as_ref().to_path_buf();
        let root = std::fs::canonicalize(&given_root).map_err(|source| {
            PolicyError::RootUnavailable {
                path: given_root.clone(),
                source,
            }
        })?;
        let blocked = compile_globs(&config.blocked_patterns)?;
        let seal = compile_globs(&config.always_seal_patterns)?;
        tracing::debug!(
            root = %root.display(),
            blocked = config.blocked_patterns.len(),
            extensions = config.allowed_extensions.len(),
            "access policy compiled"
        );
        Ok(Self {
            root,
            given_root,
            config,
            blocked,
            seal,
        })
    }

    /// Canonical project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration this policy was compiled from
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AccessPolicyConfig {
        &self.config
    }

    /// Size ceiling in bytes
    #[inline]
    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    /// Resolve a caller-supplied path to a root-relative [`ProjectPath`]
    ///
    /// Relative paths are taken relative to the root. The result is lexically
    /// normalized, then the deepest existing ancestor is canonicalized so a
    /// symlink inside the tree cannot point the write elsewhere.
    ///
    /// # Errors
    /// [`PolicyError::PathViolation`] when the path resolves outside the root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<ProjectPath, PolicyError> {
        let raw = path.as_ref();
        let shown = raw.display().to_string();
        if raw.as_os_str().is_empty() {
            return Err(PolicyError::InvalidPath("empty path".into()));
        }

        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let normalized = normalize_lexically(&joined)
            .ok_or_else(|| PolicyError::path_violation(&shown, "traverses above the filesystem root"))?;

        let relative = normalized
            .strip_prefix(&self.root)
            .or_else(|_| normalized.strip_prefix(&self.given_root))
            .map_err(|_| PolicyError::path_violation(&shown, "resolves outside the project root"))?
            .to_path_buf();
        let project_path = ProjectPath::from_relative(&relative)?;

        let anchored = anchor_existing(&project_path.under(&self.root)).map_err(|e| {
            PolicyError::path_violation(&shown, format!("cannot resolve link: {e}"))
        })?;
        if !anchored.starts_with(&self.root) {
            tracing::warn!(path = %shown, "symlink escapes project root");
            return Err(PolicyError::path_violation(&shown, "symlink escapes the project root"));
        }

        Ok(project_path)
    }

    /// Check extension allow-list and blocked patterns
    ///
    /// # Errors
    /// [`PolicyError::PolicyViolation`] naming the first rule that fails.
    pub fn check_path(&self, path: &ProjectPath) -> Result<(), PolicyError> {
        let shown = path.to_string();
        let matches = self.blocked.matches(&shown);
        if let Some(idx) = matches.first() {
            let pattern = self.config.blocked_patterns[*idx].clone();
            return Err(PolicyError::policy_violation(shown, PolicyRule::BlockedPath(pattern)));
        }

        match path.extension() {
            Some(ext) if self.config.allowed_extensions.contains(&ext) => Ok(()),
            Some(ext) => Err(PolicyError::policy_violation(
                shown,
                PolicyRule::DisallowedExtension(ext),
            )),
            None if self.config.allowed_file_names.contains(path.file_name()) => Ok(()),
            None => Err(PolicyError::policy_violation(shown, PolicyRule::MissingExtension)),
        }
    }

    /// Check a payload size against the ceiling
    ///
    /// # Errors
    /// [`PolicyError::PolicyViolation`] with [`PolicyRule::FileTooLarge`].
    pub fn check_size(&self, path: &ProjectPath, size: u64) -> Result<(), PolicyError> {
        if size > self.config.max_file_size {
            return Err(PolicyError::policy_violation(
                path.to_string(),
                PolicyRule::FileTooLarge {
                    size,
                    max: self.config.max_file_size,
                },
            ));
        }
        Ok(())
    }

    /// Full pre-write check: containment, path rules, and size
    ///
    /// # Errors
    /// Path or policy violation; nothing is written by the caller on error.
    pub fn check_write(&self, path: impl AsRef<Path>, size: u64) -> Result<ProjectPath, PolicyError> {
        let resolved = self.resolve(path)?;
        self.check_path(&resolved)?;
        self.check_size(&resolved, size)?;
        Ok(resolved)
    }

    /// Whether content at `path` must always be sealed at rest
    #[must_use]
    pub fn should_seal(&self, path: &ProjectPath) -> bool {
        self.seal.is_match(path.to_string())
    }

    /// Absolute location of `path` in the real project tree
    #[inline]
    #[must_use]
    pub fn absolute(&self, path: &ProjectPath) -> PathBuf {
        path.under(&self.root)
    }
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet, PolicyError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| PolicyError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| PolicyError::InvalidPattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}

/// Resolve `.` and `..` without touching the filesystem
///
/// Returns `None` if `..` would climb above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    Some(out)
}

/// Canonicalize the deepest existing ancestor and re-append the remainder
fn anchor_existing(path: &Path) -> io::Result<PathBuf> {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        match std::fs::symlink_metadata(current) {
            Ok(_) => {
                let mut anchored = std::fs::canonicalize(current)?;
                for seg in missing.iter().rev() {
                    anchored.push(seg);
                }
                return Ok(anchored);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = current.file_name() else {
                    return Err(e);
                };
                missing.push(name.to_os_string());
                let Some(parent) = current.parent() else {
                    return Err(e);
                };
                current = parent;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(dir: &Path) -> AccessPolicy {
        AccessPolicy::new(dir, AccessPolicyConfig::default()).unwrap()
    }

    #[test]
    fn resolve_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let path = policy.resolve("src/lib.rs").unwrap();
        assert_eq!(path.to_string(), "src/lib.rs");
    }

    #[test]
    fn resolve_absolute_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let path = policy.resolve(dir.path().join("a/b.rs")).unwrap();
        assert_eq!(path.to_string(), "a/b.rs");
    }

    #[test]
    fn resolve_traversal_is_path_violation() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let err = policy.resolve("../../etc/passwd").unwrap_err();
        assert!(err.is_path_violation());
    }

    #[test]
    fn resolve_absolute_outside_root_is_path_violation() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let err = policy.resolve("/etc/passwd").unwrap_err();
        assert!(err.is_path_violation());
    }

    #[test]
    fn resolve_inner_traversal_stays_inside() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let path = policy.resolve("src/../lib/x.ts").unwrap();
        assert_eq!(path.to_string(), "lib/x.ts");
    }

    #[cfg(unix)]
    #[test]
    fn resolve_symlink_escape_is_path_violation() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let policy = policy(dir.path());
        let err = policy.resolve("link/evil.rs").unwrap_err();
        assert!(err.is_path_violation());
    }

    #[test]
    fn check_path_extension_rules() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        assert!(policy.check_path(&"src/main.rs".parse().unwrap()).is_ok());
        assert!(policy.check_path(&"Makefile".parse().unwrap()).is_ok());

        let err = policy.check_path(&"tool.exe".parse().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::PolicyViolation { rule: PolicyRule::DisallowedExtension(_), .. }
        ));

        let err = policy.check_path(&"script".parse().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::PolicyViolation { rule: PolicyRule::MissingExtension, .. }
        ));
    }

    #[test]
    fn check_path_blocked_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        for blocked in [".env", "config/.env.local", "node_modules/x/index.js", ".cgate/mirror/a.rs"] {
            let err = policy.check_path(&blocked.parse().unwrap()).unwrap_err();
            assert!(
                matches!(err, PolicyError::PolicyViolation { rule: PolicyRule::BlockedPath(_), .. }),
                "{blocked} should be blocked"
            );
        }
    }

    #[test]
    fn check_write_size_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let config = AccessPolicyConfig::default().with_max_file_size(10);
        let policy = AccessPolicy::new(dir.path(), config).unwrap();
        assert!(policy.check_write("a.rs", 10).is_ok());
        let err = policy.check_write("a.rs", 11).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::PolicyViolation { rule: PolicyRule::FileTooLarge { size: 11, max: 10 }, .. }
        ));
    }

    #[test]
    fn should_seal_matches_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        assert!(policy.should_seal(&"config/secrets/db.json".parse().unwrap()));
        assert!(!policy.should_seal(&"src/lib.rs".parse().unwrap()));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = AccessPolicyConfig::default().with_blocked_pattern("a[");
        let err = AccessPolicy::new(dir.path(), config).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPattern { .. }));
    }

    #[test]
    fn missing_root_rejected() {
        let err = AccessPolicy::new("/definitely/not/here", AccessPolicyConfig::default()).unwrap_err();
        assert!(matches!(err, PolicyError::RootUnavailable { .. }));
    }
}
