//! Validated relative paths and containment-safe resolution against a root.
//!
//! Client supplied strings never touch the filesystem directly. They are first
//! parsed into a [`RelativePath`] (pure syntax check) and then resolved through
//! a [`PathSandbox`], which canonicalizes the joined path and re-checks that it
//! is still below the sandbox root. The second check is what catches symlinks.

use crate::error::{Result, SandboxError};
use crate::security::{canonicalize_lenient, ensure_strictly_within};
use std::fmt;
use std::path::{Path, PathBuf};

/// A relative path that passed syntactic validation.
///
/// Invariants: non-empty, only `[A-Za-z0-9_./-]`, no leading `/`, no `..`
/// segment, and at least one segment that is not `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    /// Validate a client supplied path. Surrounding whitespace is ignored.
    pub fn parse(candidate: &str) -> Result<Self> {
        let trimmed = candidate.trim();

        if trimmed.is_empty() {
            return Err(SandboxError::invalid_path(candidate, "path cannot be empty"));
        }

        if let Some(bad) = trimmed.chars().find(|c| !is_allowed_char(*c)) {
            return Err(SandboxError::invalid_path(
                candidate,
                format!("disallowed character {bad:?}"),
            ));
        }

        if trimmed.starts_with('/') {
            return Err(SandboxError::invalid_path(
                candidate,
                "absolute paths are not allowed",
            ));
        }

        if trimmed.split('/').any(|segment| segment == "..") {
            return Err(SandboxError::invalid_path(
                candidate,
                "parent directory segments are not allowed",
            ));
        }

        if !trimmed
            .split('/')
            .any(|segment| !segment.is_empty() && segment != ".")
        {
            return Err(SandboxError::invalid_path(
                candidate,
                "path does not name an entry",
            ));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Like [`RelativePath::parse`] but maps an empty candidate to `None`.
    pub fn parse_allow_empty(candidate: &str) -> Result<Option<Self>> {
        if candidate.trim().is_empty() {
            return Ok(None);
        }
        Self::parse(candidate).map(Some)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normal segments of the path, with `.` and empty segments dropped.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
    }

    /// Last normal segment.
    pub fn file_name(&self) -> &str {
        self.segments().last().unwrap_or(&self.0)
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

/// A root directory that relative paths are resolved against.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox for an existing directory. The root is canonicalized once.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| SandboxError::Configuration {
            message: format!("Failed to resolve sandbox root {}: {e}", root.display()),
        })?;
        Ok(Self { root: canonical })
    }

    /// Canonical root of this sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and resolve a raw client string.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf> {
        let relative = RelativePath::parse(candidate)?;
        self.resolve_relative(&relative)
    }

    /// Resolve an already validated path, re-checking containment after canonicalization.
    pub fn resolve_relative(&self, relative: &RelativePath) -> Result<PathBuf> {
        let mut joined = self.root.clone();
        for segment in relative.segments() {
            joined.push(segment);
        }

        let resolved = canonicalize_lenient(&joined).map_err(|e| {
            tracing::debug!("Could not resolve '{}' under {:?}: {}", relative, self.root, e);
            SandboxError::PathEscape {
                path: relative.to_string(),
                resolved: joined.clone(),
                root: self.root.clone(),
            }
        })?;

        ensure_strictly_within(relative.as_str(), &resolved, &self.root)?;

        tracing::trace!(
            "Path validated: '{}' -> '{}' (within '{}')",
            relative,
            resolved.display(),
            self.root.display()
        );

        Ok(resolved)
    }

    /// Resolve a candidate that may be empty, in which case the root itself is returned.
    pub fn resolve_allow_empty(&self, candidate: &str) -> Result<PathBuf> {
        match RelativePath::parse_allow_empty(candidate)? {
            Some(relative) => self.resolve_relative(&relative),
            None => Ok(self.root.clone()),
        }
    }

    /// Forward-slash path of `absolute` relative to the root, or `None` when outside it.
    pub fn relative_of(&self, absolute: &Path) -> Option<String> {
        to_forward_slash(absolute.strip_prefix(&self.root).ok()?)
    }
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_forward_slash(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_safe_paths() {
        for ok in ["file.txt", "a/b/c.rpy", "game/scripts/x-y_z.rpyc", "./a", "dir/"] {
            assert!(RelativePath::parse(ok).is_ok(), "should accept {ok:?}");
        }
    }

    #[test]
    fn test_parse_rejects_unsafe_paths() {
        let rejected = [
            "",
            "   ",
            "/etc/passwd",
            "../outside.txt",
            "a/../../b",
            "a/..",
            "with space.txt",
            "back\\slash",
            "null\0byte",
            "ünïcode.txt",
            ".",
            "./.",
        ];
        for bad in rejected {
            assert!(
                matches!(RelativePath::parse(bad), Err(SandboxError::InvalidPath { .. })),
                "should reject {bad:?}"
            );
        }
    }

    #[test]
    fn test_dots_inside_names_are_fine() {
        let path = RelativePath::parse("archive..rpa").unwrap();
        assert_eq!(path.file_name(), "archive..rpa");
    }

    #[test]
    fn test_parse_allow_empty() {
        assert!(RelativePath::parse_allow_empty("").unwrap().is_none());
        assert!(RelativePath::parse_allow_empty("a").unwrap().is_some());
        assert!(RelativePath::parse_allow_empty("..").is_err());
    }

    #[test]
    fn test_resolve_is_descendant() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();

        let resolved = sandbox.resolve("nested/dir/file.txt").unwrap();
        assert!(resolved.starts_with(sandbox.root()));
        assert_ne!(resolved, sandbox.root());
        assert_eq!(
            sandbox.relative_of(&resolved).as_deref(),
            Some("nested/dir/file.txt")
        );
    }

    #[test]
    fn test_resolve_allow_empty_returns_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();

        assert_eq!(sandbox.resolve_allow_empty("").unwrap(), sandbox.root());
        assert!(sandbox.resolve("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_caught() {
        let temp_dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        let result = sandbox.resolve("link/secret.txt");
        assert!(matches!(result, Err(SandboxError::PathEscape { .. })));

        // Not-yet-existing targets below the link escape as well
        let result = sandbox.resolve("link/new/file.txt");
        assert!(matches!(result, Err(SandboxError::PathEscape { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_within_sandbox_is_allowed() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp_dir.path().join("real")).unwrap();
        std::fs::write(temp_dir.path().join("real/file.txt"), "x").unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("alias"))
            .unwrap();

        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        assert!(sandbox.resolve("alias/file.txt").is_ok());
    }
}
