//! Security utilities for path validation and sandboxing.

use crate::error::{Result, SandboxError};
use std::path::{Path, PathBuf};

/// Sets secure permissions on a directory (Unix only).
pub async fn set_secure_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|_e| SandboxError::Permission {
                operation: "set secure permissions".to_string(),
                path: path.to_path_buf(),
            })?;
    }

    #[cfg(not(unix))]
    {
        // Permissions are left to the platform; only existence is checked
        if !path.exists() {
            return Err(SandboxError::Configuration {
                message: format!("Directory does not exist: {}", path.display()),
            });
        }
    }

    Ok(())
}

/// Resolves `path` the way the OS would, even when its tail does not exist yet.
///
/// The longest existing ancestor is canonicalized (following symlinks) and the
/// remaining components are appended verbatim. Components that do not exist
/// cannot be symlinks, so the result is the location a create would touch.
pub fn canonicalize_lenient(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    // A dangling symlink must not be treated as a plain missing entry
    if let Ok(meta) = std::fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("dangling symlink: {}", path.display()),
        ));
    }

    let mut tail = Vec::new();
    let mut cursor = path;
    loop {
        let (Some(parent), Some(name)) = (cursor.parent(), cursor.file_name()) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no existing ancestor for {}", path.display()),
            ));
        };
        tail.push(name.to_os_string());
        if let Ok(canonical_parent) = parent.canonicalize() {
            let mut resolved = canonical_parent;
            for component in tail.iter().rev() {
                resolved.push(component);
            }
            return Ok(resolved);
        }
        cursor = parent;
    }
}

/// Verifies that an already-canonical path sits strictly below a canonical root.
pub fn ensure_strictly_within(
    candidate: &str,
    canonical_path: &Path,
    canonical_root: &Path,
) -> Result<()> {
    if canonical_path == canonical_root || !canonical_path.starts_with(canonical_root) {
        return Err(SandboxError::PathEscape {
            path: candidate.to_string(),
            resolved: canonical_path.to_path_buf(),
            root: canonical_root.to_path_buf(),
        });
    }
    Ok(())
}
