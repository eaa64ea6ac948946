//! Upload ingestion into a job's input side.
//!
//! An [`IngestSession`] covers one upload request: the byte cap applies to the
//! sum of every file in the request, and the expansion budget is shared by
//! every zip in it. Zip uploads are expanded next to where they were written
//! and then removed.

pub mod zip_expand;

use crate::config::StorageConfig;
use crate::errors::{AppError, AppResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use job_sandbox::JobPaths;
use job_sandbox::security::{canonicalize_lenient, ensure_strictly_within};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use zip_expand::ExtractBudget;

/// Name used when a client sends a file part without a file name
pub const FALLBACK_UPLOAD_NAME: &str = "upload.bin";

/// Size caps applied to one upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    pub max_upload_bytes: u64,
    pub max_extracted_bytes: u64,
}

impl From<&StorageConfig> for IngestLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes(),
            max_extracted_bytes: config.max_extracted_bytes(),
        }
    }
}

/// Normalize a client-declared upload name into a relative path.
///
/// Backslashes become slashes, leading slashes and `.` segments are dropped.
/// Any `..` segment rejects the name.
pub fn normalize_upload_name(declared: Option<&str>) -> AppResult<String> {
    let Some(raw) = declared.filter(|n| !n.trim().is_empty()) else {
        return Ok(FALLBACK_UPLOAD_NAME.to_string());
    };
    if raw.contains('\0') {
        return Err(AppError::invalid_path(raw, "contains a NUL byte"));
    }

    let unified = raw.trim().replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(AppError::invalid_path(raw, "parent directory segment")),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(AppError::invalid_path(raw, "no file name"));
    }
    Ok(segments.join("/"))
}

/// Entry point for uploads; hands out one [`IngestSession`] per request.
#[derive(Debug, Clone)]
pub struct ArchiveIngestor {
    limits: IngestLimits,
}

impl ArchiveIngestor {
    pub fn new(limits: IngestLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> IngestLimits {
        self.limits
    }

    /// Start a session writing into `job`'s input side.
    ///
    /// The caller must hold the job's exclusive lock for the session's lifetime.
    pub fn begin(&self, job: &JobPaths) -> AppResult<IngestSession> {
        let input_root = job.input().canonicalize()?;
        Ok(IngestSession {
            input_root,
            max_upload_bytes: self.limits.max_upload_bytes,
            received: 0,
            budget: ExtractBudget::new(self.limits.max_extracted_bytes),
            stored: Vec::new(),
        })
    }
}

/// State of one upload request.
#[derive(Debug)]
pub struct IngestSession {
    input_root: PathBuf,
    max_upload_bytes: u64,
    received: u64,
    budget: ExtractBudget,
    stored: Vec<String>,
}

impl IngestSession {
    /// Total upload bytes received so far
    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    /// Normalized names written so far, in arrival order
    pub fn stored(&self) -> &[String] {
        &self.stored
    }

    fn destination(&self, name: &str) -> AppResult<PathBuf> {
        let mut target = self.input_root.clone();
        target.extend(name.split('/'));
        let resolved = canonicalize_lenient(&target).map_err(|e| {
            debug!("Could not resolve upload target {:?}: {}", target, e);
            AppError::PathEscape {
                path: name.to_string(),
            }
        })?;
        ensure_strictly_within(name, &resolved, &self.input_root)?;
        Ok(resolved)
    }

    /// Stream one file into the input side, expanding it if it is a zip.
    ///
    /// Returns the normalized name it was stored under.
    pub async fn ingest<S, E>(&mut self, declared: Option<&str>, stream: S) -> AppResult<String>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let name = normalize_upload_name(declared)?;
        let target = self.destination(&name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Directories created above may not be symlinks into elsewhere
        let target = self.destination(&name)?;

        let mut stream = std::pin::pin!(stream);
        let mut out = tokio::fs::File::create(&target).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| AppError::validation(format!("Failed to read upload {name}: {e}")))?;
            let next_total = self.received.saturating_add(chunk.len() as u64);
            if next_total > self.max_upload_bytes {
                drop(out);
                if let Err(e) = tokio::fs::remove_file(&target).await {
                    warn!("Failed to remove partial upload {:?}: {}", target, e);
                }
                return Err(AppError::payload_too_large("upload", self.max_upload_bytes));
            }
            out.write_all(&chunk).await?;
            self.received = next_total;
        }
        out.flush().await?;
        drop(out);

        if zip_expand::is_zip_name(&target) {
            self.expand(&target).await?;
            info!("Expanded uploaded archive {}", name);
        } else {
            debug!("Stored upload {} ({} bytes total)", name, self.received);
        }

        self.stored.push(name.clone());
        Ok(name)
    }

    async fn expand(&mut self, archive: &Path) -> AppResult<()> {
        let dest = match archive.parent() {
            Some(parent) => parent.to_path_buf(),
            None => self.input_root.clone(),
        };
        let archive_path = archive.to_path_buf();
        let mut budget = self.budget;
        let (result, budget) = tokio::task::spawn_blocking(move || {
            let result = zip_expand::expand(&archive_path, &dest, &mut budget);
            (result, budget)
        })
        .await?;
        self.budget = budget;
        result?;
        tokio::fs::remove_file(archive).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_sandbox::JobStore;
    use std::convert::Infallible;
    use std::io::Write;

    fn chunks(data: &[&[u8]]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        let owned: Vec<Result<Bytes, Infallible>> = data
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(owned)
    }

    async fn setup(max_upload_bytes: u64) -> (tempfile::TempDir, JobStore, JobPaths, ArchiveIngestor) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::builder()
            .jobs_root(temp_dir.path().join("jobs"))
            .build()
            .await
            .unwrap();
        let job = store.create_job().await.unwrap();
        let ingestor = ArchiveIngestor::new(IngestLimits {
            max_upload_bytes,
            max_extracted_bytes: 1 << 20,
        });
        (temp_dir, store, job, ingestor)
    }

    #[test]
    fn test_normalize_upload_name() {
        assert_eq!(normalize_upload_name(Some("a.rpyc")).unwrap(), "a.rpyc");
        assert_eq!(normalize_upload_name(Some("\\game\\a b.rpyc")).unwrap(), "game/a b.rpyc");
        assert_eq!(normalize_upload_name(Some("//x/./y.txt")).unwrap(), "x/y.txt");
        assert_eq!(normalize_upload_name(None).unwrap(), FALLBACK_UPLOAD_NAME);
        assert_eq!(normalize_upload_name(Some("  ")).unwrap(), FALLBACK_UPLOAD_NAME);
        assert!(matches!(
            normalize_upload_name(Some("../evil.txt")),
            Err(AppError::InvalidPath { .. })
        ));
        assert!(normalize_upload_name(Some("a\\..\\b")).is_err());
        assert!(normalize_upload_name(Some("/./")).is_err());
    }

    #[tokio::test]
    async fn test_streams_files_and_counts_total() {
        let (_temp_dir, _store, job, ingestor) = setup(1024).await;
        let mut session = ingestor.begin(&job).unwrap();

        let name = session
            .ingest(Some("game/script.rpyc"), chunks(&[b"abc", b"def"]))
            .await
            .unwrap();
        session.ingest(Some("b.txt"), chunks(&[b"xy"])).await.unwrap();

        assert_eq!(name, "game/script.rpyc");
        assert_eq!(session.received_bytes(), 8);
        assert_eq!(session.stored(), &["game/script.rpyc".to_string(), "b.txt".to_string()]);
        assert_eq!(
            std::fs::read(job.input().join("game/script.rpyc")).unwrap(),
            b"abcdef"
        );
    }

    #[tokio::test]
    async fn test_cap_is_across_the_request() {
        let (_temp_dir, _store, job, ingestor) = setup(10).await;
        let mut session = ingestor.begin(&job).unwrap();

        session.ingest(Some("a.bin"), chunks(&[b"123456"])).await.unwrap();
        let err = session
            .ingest(Some("b.bin"), chunks(&[b"123", b"456"]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PayloadTooLarge { .. }));
        assert!(job.input().join("a.bin").exists());
        assert!(!job.input().join("b.bin").exists());
    }

    #[tokio::test]
    async fn test_zip_upload_expanded_and_removed() {
        let (_temp_dir, _store, job, ingestor) = setup(1 << 20).await;
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("game/script.rpyc", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"code").unwrap();
            writer.finish().unwrap();
        }
        let data = buffer.into_inner();

        let mut session = ingestor.begin(&job).unwrap();
        session.ingest(Some("bundle.ZIP"), chunks(&[&data])).await.unwrap();

        assert!(job.input().join("game/script.rpyc").is_file());
        assert!(!job.input().join("bundle.ZIP").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_cannot_redirect_writes() {
        let (temp_dir, _store, job, ingestor) = setup(1024).await;
        let outside = temp_dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, job.input().join("link")).unwrap();

        let mut session = ingestor.begin(&job).unwrap();
        let err = session
            .ingest(Some("link/x.txt"), chunks(&[b"x"]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PathEscape { .. }));
        assert!(!outside.join("x.txt").exists());
    }
}
