//! Move, mkdir and delete within one side of a job.

use crate::errors::{AppError, AppResult};
use job_sandbox::PathSandbox;
use std::path::Path;
use tracing::debug;

async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

async fn remove_any(path: &Path) -> AppResult<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

/// Move `src` to `dst` inside `sandbox`.
///
/// An existing destination is a conflict unless `overwrite` is set, in which
/// case it is removed first. Missing parent directories of `dst` are created.
pub async fn move_entry(sandbox: &PathSandbox, src: &str, dst: &str, overwrite: bool) -> AppResult<()> {
    let src_path = sandbox.resolve(src)?;
    let dst_path = sandbox.resolve(dst)?;

    let src_meta = tokio::fs::symlink_metadata(&src_path)
        .await
        .map_err(|_| AppError::file_not_found(src))?;

    let invalid = AppError::InvalidMove {
        src: src.to_string(),
        dst: dst.to_string(),
    };
    if dst_path == src_path || (src_meta.is_dir() && dst_path.starts_with(&src_path)) {
        return Err(invalid);
    }

    if exists(&dst_path).await {
        if !overwrite {
            return Err(AppError::Conflict {
                path: dst.to_string(),
            });
        }
        // A file moved over one of its own ancestors would be removed with it
        if src_path.starts_with(&dst_path) {
            return Err(invalid);
        }
        remove_any(&dst_path).await?;
    }

    if let Some(parent) = dst_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(&src_path, &dst_path).await?;
    debug!("Moved {} -> {}", src, dst);
    Ok(())
}

/// Create `path` and any missing parents. Existing directories are fine.
pub async fn make_dir(sandbox: &PathSandbox, path: &str) -> AppResult<()> {
    let target = sandbox.resolve(path)?;
    if let Ok(meta) = tokio::fs::metadata(&target).await
        && !meta.is_dir()
    {
        return Err(AppError::Conflict {
            path: path.to_string(),
        });
    }
    tokio::fs::create_dir_all(&target).await?;
    Ok(())
}

/// Remove a file, or a directory recursively.
pub async fn delete_entry(sandbox: &PathSandbox, path: &str) -> AppResult<()> {
    let target = sandbox.resolve(path)?;
    if !exists(&target).await {
        return Err(AppError::file_not_found(path));
    }
    remove_any(&target).await?;
    debug!("Deleted {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, PathSandbox) {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("output");
        std::fs::create_dir_all(root.join("dir/sub")).unwrap();
        std::fs::write(root.join("dir/sub/a.txt"), "a").unwrap();
        std::fs::write(root.join("b.txt"), "b").unwrap();
        let sandbox = PathSandbox::new(&root).unwrap();
        (temp_dir, sandbox)
    }

    #[tokio::test]
    async fn test_move_creates_parents() {
        let (_temp_dir, sandbox) = sandbox();
        move_entry(&sandbox, "b.txt", "new/place/b.txt", false)
            .await
            .unwrap();
        assert!(sandbox.root().join("new/place/b.txt").is_file());
        assert!(!sandbox.root().join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_move_conflict_and_overwrite() {
        let (_temp_dir, sandbox) = sandbox();
        let err = move_entry(&sandbox, "b.txt", "dir", false).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        move_entry(&sandbox, "b.txt", "dir", true).await.unwrap();
        assert!(sandbox.root().join("dir").is_file());
        assert_eq!(std::fs::read_to_string(sandbox.root().join("dir")).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_move_into_itself_rejected() {
        let (_temp_dir, sandbox) = sandbox();
        for dst in ["dir", "dir/sub/inner"] {
            let err = move_entry(&sandbox, "dir", dst, true).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidMove { .. }), "{dst}");
        }
        let err = move_entry(&sandbox, "dir/sub/a.txt", "dir", true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidMove { .. }));
        assert!(sandbox.root().join("dir/sub/a.txt").is_file());
    }

    #[tokio::test]
    async fn test_move_missing_source() {
        let (_temp_dir, sandbox) = sandbox();
        let err = move_entry(&sandbox, "nope.txt", "x.txt", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_mkdir_idempotent_and_delete() {
        let (_temp_dir, sandbox) = sandbox();
        make_dir(&sandbox, "x/y/z").await.unwrap();
        make_dir(&sandbox, "x/y/z").await.unwrap();
        assert!(sandbox.root().join("x/y/z").is_dir());
        assert!(matches!(
            make_dir(&sandbox, "b.txt").await,
            Err(AppError::Conflict { .. })
        ));

        delete_entry(&sandbox, "dir").await.unwrap();
        assert!(!sandbox.root().join("dir").exists());
        assert!(matches!(
            delete_entry(&sandbox, "dir").await,
            Err(AppError::FileNotFound { .. })
        ));
        assert!(matches!(
            delete_entry(&sandbox, "../output").await,
            Err(AppError::InvalidPath { .. })
        ));
    }
}
