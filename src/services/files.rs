//! Reading and saving file contents inside a job side.

use crate::errors::{AppError, AppResult};
use job_sandbox::{PathSandbox, content_type};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Bytes read for content sniffing when the extension is not enough
const SNIFF_LEN: usize = 512;

/// A file fetched for raw download.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A validated, existing regular file ready to be streamed.
#[derive(Debug, Clone)]
pub struct ServedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

async fn existing_file(sandbox: &PathSandbox, path: &str) -> AppResult<(PathBuf, u64)> {
    let target = sandbox.resolve(path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_file() => Ok((target, meta.len())),
        _ => Err(AppError::file_not_found(path)),
    }
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read a file as UTF-8 text, replacing invalid sequences.
pub async fn read_text(sandbox: &PathSandbox, path: &str, max_bytes: u64) -> AppResult<String> {
    let (target, size) = existing_file(sandbox, path).await?;
    if size > max_bytes {
        return Err(AppError::payload_too_large(
            format!("text preview of {path}"),
            max_bytes,
        ));
    }
    let bytes = tokio::fs::read(&target).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read a whole file with its guessed content type.
pub async fn read_raw(sandbox: &PathSandbox, path: &str) -> AppResult<RawFile> {
    let (target, _) = existing_file(sandbox, path).await?;
    let bytes = tokio::fs::read(&target).await?;
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    Ok(RawFile {
        file_name: file_name_of(&target),
        content_type: content_type::guess(&target, head),
        bytes,
    })
}

/// Locate a file for streaming. Only the first bytes are read, for sniffing.
pub async fn open_served(sandbox: &PathSandbox, path: &str) -> AppResult<ServedFile> {
    use tokio::io::AsyncReadExt;

    let (target, size) = existing_file(sandbox, path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    tokio::fs::File::open(&target)
        .await?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .await?;
    Ok(ServedFile {
        file_name: file_name_of(&target),
        content_type: content_type::guess(&target, &head),
        path: target,
        size,
    })
}

/// Atomically replace an existing file's contents. Returns bytes written.
pub async fn save_text(
    sandbox: &PathSandbox,
    path: &str,
    content: String,
    max_bytes: u64,
) -> AppResult<u64> {
    let len = content.len() as u64;
    if len > max_bytes {
        return Err(AppError::payload_too_large(
            format!("content for {path}"),
            max_bytes,
        ));
    }
    let (target, _) = existing_file(sandbox, path).await?;
    let dir = target
        .parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| AppError::invalid_path(path, "no parent directory"))?;

    tokio::task::spawn_blocking(move || -> AppResult<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    })
    .await??;

    debug!("Saved {} bytes to {}", len, path);
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, PathSandbox) {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("output");
        std::fs::create_dir_all(root.join("game")).unwrap();
        std::fs::write(root.join("game/script.rpy"), "label start:\n").unwrap();
        std::fs::write(root.join("game/bad.txt"), [0x66, 0xff, 0x6f]).unwrap();
        let sandbox = PathSandbox::new(&root).unwrap();
        (temp_dir, sandbox)
    }

    #[tokio::test]
    async fn test_read_text() {
        let (_temp_dir, sandbox) = sandbox();
        assert_eq!(
            read_text(&sandbox, "game/script.rpy", 1024).await.unwrap(),
            "label start:\n"
        );
        assert_eq!(
            read_text(&sandbox, "game/bad.txt", 1024).await.unwrap(),
            "f\u{fffd}o"
        );
        assert!(matches!(
            read_text(&sandbox, "game/script.rpy", 4).await,
            Err(AppError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            read_text(&sandbox, "game", 1024).await,
            Err(AppError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_raw_content_type() {
        let (_temp_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("data.json"), "{}").unwrap();
        let raw = read_raw(&sandbox, "data.json").await.unwrap();
        assert_eq!(raw.content_type, "application/json");
        assert_eq!(raw.bytes, b"{}");

        let served = open_served(&sandbox, "game/script.rpy").await.unwrap();
        assert_eq!(served.file_name, "script.rpy");
        assert_eq!(served.size, 13);
    }

    #[tokio::test]
    async fn test_save_text_replaces_existing_only() {
        let (_temp_dir, sandbox) = sandbox();
        let written = save_text(&sandbox, "game/script.rpy", "label end:".to_string(), 1024)
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(
            std::fs::read_to_string(sandbox.root().join("game/script.rpy")).unwrap(),
            "label end:"
        );

        assert!(matches!(
            save_text(&sandbox, "game/new.rpy", "x".to_string(), 1024).await,
            Err(AppError::FileNotFound { .. })
        ));
        assert!(matches!(
            save_text(&sandbox, "game/script.rpy", "x".repeat(20), 10).await,
            Err(AppError::PayloadTooLarge { .. })
        ));
        let leftovers: Vec<_> = std::fs::read_dir(sandbox.root().join("game"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 2);
    }
}
