//! Root-relative project paths
//!
//! Provides [`ProjectPath`], a normalized path that is guaranteed to stay
//! inside the project root once produced by [`crate::AccessPolicy::resolve`].

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::PolicyError;

/// Path of a file inside the project tree
///
/// Stored as normalized segments: no `.`, no `..`, no empty segments.
/// Displayed with `/` separators regardless of platform.
///
/// # Examples
/// - `src/lib.rs` → `["src", "lib.rs"]`
/// - `./src/../Cargo.toml` → `["Cargo.toml"]`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectPath(Vec<String>);

impl ProjectPath {
    /// Create path from already-normalized segments
    ///
    /// # Errors
    /// Returns error if the segment list is empty or any segment is `.`, `..`,
    /// empty, or contains a separator.
    pub fn new(segments: Vec<String>) -> Result<Self, PolicyError> {
        if segments.is_empty() {
            return Err(PolicyError::InvalidPath("path names the project root".into()));
        }
        for seg in &segments {
            validate_segment(seg)?;
        }
        Ok(Self(segments))
    }

    /// Build from a relative path, normalizing `.` and `..` lexically
    ///
    /// # Errors
    /// Returns [`PolicyError::PathViolation`] if the path climbs above its
    /// starting point or is absolute.
    pub fn from_relative(path: &Path) -> Result<Self, PolicyError> {
        let mut segments: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return Err(PolicyError::path_violation(
                            path.display().to_string(),
                            "traverses above the project root",
                        ));
                    }
                }
                Component::Normal(seg) => {
                    let seg = seg.to_str().ok_or_else(|| {
                        PolicyError::InvalidPath(format!("non UTF-8 path: {}", path.display()))
                    })?;
                    segments.push(seg.to_string());
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PolicyError::path_violation(
                        path.display().to_string(),
                        "absolute path where a project-relative path was expected",
                    ));
                }
            }
        }
        Self::new(segments)
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: a project path names at least one segment
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Final segment (file name)
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    /// File stem (file name without the last extension)
    #[must_use]
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }

    /// Lowercased extension without the dot
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        Path::new(self.file_name())
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Directory containing this path, if not at the top level
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Sibling path with a different file name
    #[must_use]
    pub fn with_file_name(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.pop();
        segments.push(name.into());
        Self(segments)
    }

    /// Relative path with platform separators
    #[must_use]
    pub fn to_relative_path(&self) -> PathBuf {
        self.0.iter().collect()
    }

    /// Absolute location under `base`
    #[must_use]
    pub fn under(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for seg in &self.0 {
            out.push(seg);
        }
        out
    }

    /// Check whether `self` starts with the directory path `prefix`
    #[inline]
    #[must_use]
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        prefix.len() <= self.0.len() && prefix.iter().zip(&self.0).all(|(a, b)| a == b)
    }
}

fn validate_segment(seg: &str) -> Result<(), PolicyError> {
    if seg.is_empty() || seg == "." || seg == ".." {
        return Err(PolicyError::InvalidPath(format!("invalid segment '{seg}'")));
    }
    if seg.contains(['/', '\\', '\0']) {
        return Err(PolicyError::InvalidPath(format!("segment '{seg}' contains a separator")));
    }
    Ok(())
}

impl Display for ProjectPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for ProjectPath {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('\0') {
            return Err(PolicyError::InvalidPath("path contains NUL".into()));
        }
        Self::from_relative(Path::new(&s.replace('\\', "/")))
    }
}

impl AsRef<[String]> for ProjectPath {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

impl serde::Serialize for ProjectPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ProjectPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_from_str_normalizes() {
        let path: ProjectPath = "./src/../src/lib.rs".parse().unwrap();
        assert_eq!(path.segments(), &["src", "lib.rs"]);
        assert_eq!(path.to_string(), "src/lib.rs");
    }

    #[test]
    fn path_from_str_rejects_escape() {
        let result: Result<ProjectPath, _> = "../../etc/passwd".parse();
        assert!(matches!(result, Err(PolicyError::PathViolation { .. })));
    }

    #[test]
    fn path_from_str_rejects_absolute() {
        let result: Result<ProjectPath, _> = "/etc/passwd".parse();
        assert!(matches!(result, Err(PolicyError::PathViolation { .. })));
    }

    #[test]
    fn path_root_is_invalid() {
        let result: Result<ProjectPath, _> = "src/..".parse();
        assert!(matches!(result, Err(PolicyError::InvalidPath(_))));
    }

    #[test]
    fn path_extension_and_stem() {
        let path: ProjectPath = "web/App.Test.TSX".parse().unwrap();
        assert_eq!(path.extension().as_deref(), Some("tsx"));
        assert_eq!(path.file_stem(), "App.Test");

        let dotfile: ProjectPath = ".gitignore".parse().unwrap();
        assert_eq!(dotfile.extension(), None);
        assert_eq!(dotfile.file_stem(), ".gitignore");
    }

    #[test]
    fn path_parent_and_sibling() {
        let path: ProjectPath = "src/a/mod.rs".parse().unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "src/a");
        assert_eq!(path.with_file_name("b.rs").to_string(), "src/a/b.rs");

        let top: ProjectPath = "Cargo.toml".parse().unwrap();
        assert!(top.parent().is_none());
    }

    #[test]
    fn path_starts_with() {
        let path: ProjectPath = "tests/unit/a.rs".parse().unwrap();
        assert!(path.starts_with(&["tests"]));
        assert!(path.starts_with(&["tests", "unit"]));
        assert!(!path.starts_with(&["src"]));
    }

    #[test]
    fn path_under_base() {
        let path: ProjectPath = "src/lib.rs".parse().unwrap();
        let abs = path.under(Path::new("/work/project"));
        assert_eq!(abs, Path::new("/work/project/src/lib.rs"));
    }
}
