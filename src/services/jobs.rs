//! Job-level operations with locking and access tracking applied.
//!
//! Every public method here opens the job with the right lock (exclusive for
//! anything that writes, shared for reads), does its work through the
//! lower-level modules, and touches the job on success.

use super::{bundle, files, fs_ops};
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::ingest::{ArchiveIngestor, IngestLimits, IngestSession};
use crate::processing::{Dispatcher, PackRequest, ProcessOutcome, ProcessRequest};
use job_sandbox::{ExclusiveJob, JobPaths, JobSide, JobStore, StoreStats, TreeNode, tree};
use std::sync::Arc;
use tracing::{info, warn};

pub use files::{RawFile, ServedFile};

/// An upload in progress: the new job, held exclusively, and its ingest session.
#[derive(Debug)]
pub struct PendingUpload {
    job: ExclusiveJob,
    session: IngestSession,
}

impl PendingUpload {
    pub fn job(&self) -> &JobPaths {
        &self.job
    }

    pub fn session(&mut self) -> &mut IngestSession {
        &mut self.session
    }
}

/// A file opened for download while the job lock was held.
#[derive(Debug)]
pub struct OpenedFile {
    pub file: tokio::fs::File,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// Facade over the store, ingestion and the dispatcher.
#[derive(Debug, Clone)]
pub struct JobService {
    store: JobStore,
    dispatcher: Arc<Dispatcher>,
    ingestor: ArchiveIngestor,
    max_text_bytes: u64,
}

impl JobService {
    pub fn new(store: JobStore, config: &Config) -> Self {
        Self {
            store,
            dispatcher: Arc::new(Dispatcher::new(config.tools.clone())),
            ingestor: ArchiveIngestor::new(IngestLimits::from(&config.storage)),
            max_text_bytes: config.storage.max_text_bytes(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn ingestor(&self) -> &ArchiveIngestor {
        &self.ingestor
    }

    pub fn max_text_bytes(&self) -> u64 {
        self.max_text_bytes
    }

    /// Create a job and hold it exclusively while uploads stream in.
    pub async fn begin_upload(&self) -> AppResult<PendingUpload> {
        let created = self.store.create_job().await?;
        let job = self.store.open_exclusive(created.id().as_str()).await?;
        let session = match self.ingestor.begin(&job) {
            Ok(session) => session,
            Err(e) => {
                drop(job);
                self.discard(created.id().as_str()).await;
                return Err(e);
            }
        };
        Ok(PendingUpload { job, session })
    }

    /// Finish a successful upload and return the job id with its input tree.
    pub async fn finish_upload(&self, upload: PendingUpload) -> AppResult<(String, TreeNode)> {
        if upload.session.stored().is_empty() {
            let err = AppError::validation("No files were uploaded");
            self.abandon_upload(upload).await;
            return Err(err);
        }
        let input_tree = tree::snapshot(upload.job.input().to_path_buf()).await?;
        self.store.touch(&upload.job).await;
        info!(
            "Created job {} with {} upload(s), {} bytes",
            upload.job.id(),
            upload.session.stored().len(),
            upload.session.received_bytes()
        );
        Ok((upload.job.id().to_string(), input_tree))
    }

    /// Throw away a job whose upload failed; its id was never handed out.
    pub async fn abandon_upload(&self, upload: PendingUpload) {
        let id = upload.job.id().to_string();
        drop(upload);
        self.discard(&id).await;
    }

    async fn discard(&self, id: &str) {
        if let Err(e) = self.store.delete_job(id).await {
            warn!("Failed to discard job {}: {}", id, e);
        }
    }

    pub async fn delete_job(&self, id: &str) -> AppResult<()> {
        self.store.delete_job(id).await?;
        Ok(())
    }

    pub async fn stats(&self) -> AppResult<StoreStats> {
        Ok(self.store.stats().await?)
    }

    pub async fn tree(&self, id: &str, side: JobSide) -> AppResult<TreeNode> {
        let job = self.store.open_shared(id).await?;
        let snapshot = tree::snapshot(job.side(side).to_path_buf()).await?;
        self.store.touch(&job).await;
        Ok(snapshot)
    }

    pub async fn process(&self, id: &str, request: &ProcessRequest) -> AppResult<ProcessOutcome> {
        let job = self.store.open_exclusive(id).await?;
        let outcome = self.dispatcher.process(&job, request).await?;
        self.store.touch(&job).await;
        Ok(outcome)
    }

    pub async fn repack(&self, id: &str, request: &PackRequest) -> AppResult<ProcessOutcome> {
        let job = self.store.open_exclusive(id).await?;
        let outcome = self.dispatcher.repack(&job, request).await?;
        self.store.touch(&job).await;
        Ok(outcome)
    }

    pub async fn read_text(&self, id: &str, side: JobSide, path: &str) -> AppResult<String> {
        let job = self.store.open_shared(id).await?;
        let text = files::read_text(&job.sandbox(side)?, path, self.max_text_bytes).await?;
        self.store.touch(&job).await;
        Ok(text)
    }

    pub async fn read_raw(&self, id: &str, side: JobSide, path: &str) -> AppResult<RawFile> {
        let job = self.store.open_shared(id).await?;
        let raw = files::read_raw(&job.sandbox(side)?, path).await?;
        self.store.touch(&job).await;
        Ok(raw)
    }

    pub async fn save_text(
        &self,
        id: &str,
        side: JobSide,
        path: &str,
        content: String,
    ) -> AppResult<u64> {
        let job = self.store.open_exclusive(id).await?;
        let written =
            files::save_text(&job.sandbox(side)?, path, content, self.max_text_bytes).await?;
        self.store.touch(&job).await;
        Ok(written)
    }

    pub async fn move_entry(
        &self,
        id: &str,
        side: JobSide,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        let job = self.store.open_exclusive(id).await?;
        fs_ops::move_entry(&job.sandbox(side)?, src, dst, overwrite).await?;
        self.store.touch(&job).await;
        Ok(())
    }

    pub async fn make_dir(&self, id: &str, side: JobSide, path: &str) -> AppResult<()> {
        let job = self.store.open_exclusive(id).await?;
        fs_ops::make_dir(&job.sandbox(side)?, path).await?;
        self.store.touch(&job).await;
        Ok(())
    }

    pub async fn delete_entry(&self, id: &str, side: JobSide, path: &str) -> AppResult<()> {
        let job = self.store.open_exclusive(id).await?;
        fs_ops::delete_entry(&job.sandbox(side)?, path).await?;
        self.store.touch(&job).await;
        Ok(())
    }

    /// Open one file for download.
    pub async fn open_file(&self, id: &str, side: JobSide, path: &str) -> AppResult<OpenedFile> {
        let job = self.store.open_shared(id).await?;
        let served = files::open_served(&job.sandbox(side)?, path).await?;
        let file = tokio::fs::File::open(&served.path).await?;
        self.store.touch(&job).await;
        Ok(OpenedFile {
            file,
            file_name: served.file_name,
            content_type: served.content_type,
            size: served.size,
        })
    }

    /// Build the side bundle and open it for download.
    pub async fn open_bundle(&self, id: &str, side: JobSide) -> AppResult<OpenedFile> {
        let job = self.store.open_shared(id).await?;
        let path = bundle::bundle_side(&job, side).await?;
        let file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        self.store.touch(&job).await;
        Ok(OpenedFile {
            file,
            file_name: format!("{}_{}.zip", job.id(), side),
            content_type: "application/zip".to_string(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::convert::Infallible;
    use std::time::Duration;

    async fn service() -> (tempfile::TempDir, JobService) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.jobs_root = temp_dir.path().join("jobs");
        config.tools.timeout = Duration::from_secs(5);
        let store = JobStore::builder()
            .jobs_root(&config.storage.jobs_root)
            .expiry_policy(config.storage.expiry_policy())
            .build()
            .await
            .unwrap();
        (temp_dir, JobService::new(store, &config))
    }

    fn body(data: &'static [u8]) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
        futures::stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn test_upload_then_edit_cycle() {
        let (_temp_dir, service) = service().await;

        let mut upload = service.begin_upload().await.unwrap();
        upload
            .session()
            .ingest(Some("notes/readme.txt"), body(b"hello"))
            .await
            .unwrap();
        let (id, input_tree) = service.finish_upload(upload).await.unwrap();
        assert_eq!(input_tree.file_paths(), vec!["notes/readme.txt".to_string()]);

        assert_eq!(
            service
                .read_text(&id, JobSide::Input, "notes/readme.txt")
                .await
                .unwrap(),
            "hello"
        );
        service
            .save_text(&id, JobSide::Input, "notes/readme.txt", "bye".to_string())
            .await
            .unwrap();
        service
            .move_entry(&id, JobSide::Input, "notes/readme.txt", "moved.txt", false)
            .await
            .unwrap();
        service.make_dir(&id, JobSide::Input, "empty/dir").await.unwrap();

        let tree = service.tree(&id, JobSide::Input).await.unwrap();
        assert_eq!(tree.file_paths(), vec!["moved.txt".to_string()]);
        assert_eq!(tree.children()[0].name(), "empty");

        let raw = service.read_raw(&id, JobSide::Input, "moved.txt").await.unwrap();
        assert_eq!(raw.bytes, b"bye");

        service.delete_job(&id).await.unwrap();
        assert!(matches!(
            service.tree(&id, JobSide::Input).await,
            Err(AppError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_job() {
        let (_temp_dir, service) = service().await;

        let mut upload = service.begin_upload().await.unwrap();
        let err = upload
            .session()
            .ingest(Some("../evil.txt"), body(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPath { .. }));
        service.abandon_upload(upload).await;

        assert_eq!(service.stats().await.unwrap().job_count, 0);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let (_temp_dir, service) = service().await;
        let upload = service.begin_upload().await.unwrap();
        assert!(matches!(
            service.finish_upload(upload).await,
            Err(AppError::Validation { .. })
        ));
        assert_eq!(service.stats().await.unwrap().job_count, 0);
    }

    #[tokio::test]
    async fn test_download_bundle() {
        let (_temp_dir, service) = service().await;
        let mut upload = service.begin_upload().await.unwrap();
        upload
            .session()
            .ingest(Some("a.txt"), body(b"a"))
            .await
            .unwrap();
        let (id, _) = service.finish_upload(upload).await.unwrap();

        let bundle = service.open_bundle(&id, JobSide::Input).await.unwrap();
        assert_eq!(bundle.content_type, "application/zip");
        assert!(bundle.size > 0);

        let single = service.open_file(&id, JobSide::Input, "a.txt").await.unwrap();
        assert_eq!(single.size, 1);
        assert_eq!(single.content_type, "text/plain");
    }
}
