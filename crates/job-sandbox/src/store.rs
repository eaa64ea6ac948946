//! Job workspaces on disk, their last-access bookkeeping, and per-job locking.
//!
//! Layout under the jobs root:
//!
//! ```text
//! <jobs_root>/<job id>/input/
//! <jobs_root>/<job id>/output/
//! <jobs_root>/<job id>/meta.json
//! ```
//!
//! The modification time of `meta.json` is the authoritative last-access time.

use crate::{
    error::{Result, SandboxError},
    path::PathSandbox,
    policy::ExpiryPolicy,
    security::set_secure_permissions,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    fs,
    sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock},
};

pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";
pub const META_FILE: &str = "meta.json";

/// Which subtree of a job an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSide {
    Input,
    #[default]
    Output,
}

impl JobSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => INPUT_DIR,
            Self::Output => OUTPUT_DIR,
        }
    }
}

impl fmt::Display for JobSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque job identifier: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh, unguessable identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Accept only the canonical form, so an id can never name anything but
    /// a direct child of the jobs root.
    pub fn parse(candidate: &str) -> Result<Self> {
        let well_formed = candidate.len() == 32
            && candidate
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(SandboxError::JobNotFound {
                id: candidate.to_string(),
            });
        }
        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved on-disk locations of one job.
#[derive(Debug, Clone)]
pub struct JobPaths {
    id: JobId,
    root: PathBuf,
    input: PathBuf,
    output: PathBuf,
    meta: PathBuf,
}

impl JobPaths {
    fn new(jobs_root: &Path, id: JobId) -> Self {
        let root = jobs_root.join(id.as_str());
        Self {
            input: root.join(INPUT_DIR),
            output: root.join(OUTPUT_DIR),
            meta: root.join(META_FILE),
            root,
            id,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn meta(&self) -> &Path {
        &self.meta
    }

    pub fn side(&self, side: JobSide) -> &Path {
        match side {
            JobSide::Input => &self.input,
            JobSide::Output => &self.output,
        }
    }

    /// Sandbox rooted at one side of the job. The side directory must exist.
    pub fn sandbox(&self, side: JobSide) -> Result<PathSandbox> {
        PathSandbox::new(self.side(side))
    }

    /// Where a full-side download bundle is written (job root, outside both sides).
    pub fn bundle_path(&self, side: JobSide) -> PathBuf {
        self.root.join(format!("{side}.zip"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JobMeta {
    created_at: DateTime<Utc>,
}

/// Access to a job while holding its lock.
///
/// Dereferences to [`JobPaths`]; the lock is released on drop.
#[derive(Debug)]
pub struct JobGuard<G> {
    paths: JobPaths,
    _guard: G,
}

impl<G> JobGuard<G> {
    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }
}

impl<G> Deref for JobGuard<G> {
    type Target = JobPaths;

    fn deref(&self) -> &Self::Target {
        &self.paths
    }
}

/// Held by operations that mutate a job (processing, fs ops, saves, deletion).
pub type ExclusiveJob = JobGuard<OwnedRwLockWriteGuard<()>>;
/// Held by read-only operations (tree, file fetch, downloads).
pub type SharedJob = JobGuard<OwnedRwLockReadGuard<()>>;

/// Statistics about the job store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub job_count: usize,
    pub jobs_root: PathBuf,
    pub ttl_secs: u64,
    pub expiry_enabled: bool,
}

/// Creates, resolves and expires job workspaces under one jobs root.
#[derive(Clone, Debug)]
pub struct JobStore {
    jobs_root: PathBuf,
    expiry_policy: ExpiryPolicy,
    locks: Arc<Mutex<HashMap<JobId, Arc<RwLock<()>>>>>,
}

impl JobStore {
    #[must_use]
    pub fn builder() -> JobStoreBuilder {
        JobStoreBuilder::new()
    }

    /// Canonical jobs root.
    pub fn jobs_root(&self) -> &Path {
        &self.jobs_root
    }

    pub fn expiry_policy(&self) -> &ExpiryPolicy {
        &self.expiry_policy
    }

    /// Allocate a new job and lay out its workspace.
    pub async fn create_job(&self) -> Result<JobPaths> {
        let paths = JobPaths::new(&self.jobs_root, JobId::generate());

        for dir in [paths.input(), paths.output()] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| SandboxError::DirectoryCreation {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
        }
        self.write_meta(&paths).await?;

        tracing::debug!("Created job {} at {}", paths.id(), paths.root().display());
        Ok(paths)
    }

    /// Map an identifier to its workspace, failing if the job does not exist.
    pub async fn resolve_job(&self, id: &str) -> Result<JobPaths> {
        let id = JobId::parse(id)?;
        let paths = JobPaths::new(&self.jobs_root, id);
        if !is_dir(paths.root()).await {
            return Err(SandboxError::JobNotFound {
                id: paths.id().to_string(),
            });
        }
        Ok(paths)
    }

    /// Refresh a job's last-access time. Best effort: a vanished job is ignored.
    pub async fn touch(&self, paths: &JobPaths) {
        if let Err(e) = self.try_touch(paths).await {
            tracing::debug!("Touch of job {} skipped: {}", paths.id(), e);
        }
    }

    async fn try_touch(&self, paths: &JobPaths) -> Result<()> {
        match fs::OpenOptions::new().write(true).open(paths.meta()).await {
            Ok(file) => {
                let file = file.into_std().await;
                tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now()))
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))??;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if is_dir(paths.root()).await {
                    self.write_meta(paths).await
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, paths: &JobPaths) -> Result<()> {
        let meta = JobMeta {
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec(&meta).map_err(std::io::Error::other)?;
        fs::write(paths.meta(), body).await?;
        Ok(())
    }

    /// Effective last-access time: metadata mtime, else the job directory's mtime.
    pub async fn last_access(&self, paths: &JobPaths) -> Result<DateTime<Utc>> {
        let meta = match fs::metadata(paths.meta()).await {
            Ok(meta) => meta,
            Err(_) => fs::metadata(paths.root()).await?,
        };
        Ok(DateTime::from(meta.modified()?))
    }

    /// Lock a job for mutation. Waits for in-flight readers and writers.
    pub async fn open_exclusive(&self, id: &str) -> Result<ExclusiveJob> {
        let paths = self.resolve_job(id).await?;
        let lock = self.lock_for(paths.id()).await;
        let guard = lock.write_owned().await;
        self.ensure_still_present(&paths).await?;
        Ok(JobGuard {
            paths,
            _guard: guard,
        })
    }

    /// Lock a job for reading. Concurrent readers are allowed.
    pub async fn open_shared(&self, id: &str) -> Result<SharedJob> {
        let paths = self.resolve_job(id).await?;
        let lock = self.lock_for(paths.id()).await;
        let guard = lock.read_owned().await;
        self.ensure_still_present(&paths).await?;
        Ok(JobGuard {
            paths,
            _guard: guard,
        })
    }

    /// The job may have been deleted while we waited for its lock.
    async fn ensure_still_present(&self, paths: &JobPaths) -> Result<()> {
        if is_dir(paths.root()).await {
            return Ok(());
        }
        self.forget_lock(paths.id()).await;
        Err(SandboxError::JobNotFound {
            id: paths.id().to_string(),
        })
    }

    async fn lock_for(&self, id: &JobId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn forget_lock(&self, id: &JobId) {
        self.locks.lock().await.remove(id);
    }

    /// Delete a job workspace under its exclusive lock.
    pub async fn delete_job(&self, id: &str) -> Result<()> {
        let job = self.open_exclusive(id).await?;
        fs::remove_dir_all(job.root()).await?;
        let id = job.id().clone();
        drop(job);
        self.forget_lock(&id).await;
        tracing::info!("Deleted job {}", id);
        Ok(())
    }

    /// Sweep with the store's own policy. A disabled policy removes nothing.
    pub async fn sweep(&self) -> Result<usize> {
        if !self.expiry_policy.enabled() {
            return Ok(0);
        }
        self.sweep_expired(self.expiry_policy.ttl()).await
    }

    /// Remove every job idle for longer than `ttl`.
    ///
    /// Jobs that are currently locked are skipped, as are jobs touched
    /// between the first look and acquiring the lock. Per-job failures are
    /// logged and do not stop the sweep.
    pub async fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        let policy = ExpiryPolicy::new(ttl);
        let mut entries = fs::read_dir(&self.jobs_root).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let Some(Ok(id)) = entry.file_name().to_str().map(JobId::parse) else {
                continue;
            };
            if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }

            match self.sweep_one(id.clone(), &policy).await {
                Ok(true) => {
                    tracing::debug!("Removed expired job {}", id);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to sweep job {}: {}", id, e),
            }
        }

        Ok(removed)
    }

    async fn sweep_one(&self, id: JobId, policy: &ExpiryPolicy) -> Result<bool> {
        let paths = JobPaths::new(&self.jobs_root, id);
        if !policy.is_expired(self.last_access(&paths).await?) {
            return Ok(false);
        }

        let lock = self.lock_for(paths.id()).await;
        let Ok(guard) = lock.try_write_owned() else {
            tracing::debug!("Job {} is busy, skipping sweep", paths.id());
            return Ok(false);
        };

        if !is_dir(paths.root()).await {
            drop(guard);
            self.forget_lock(paths.id()).await;
            return Ok(false);
        }
        if !policy.is_expired(self.last_access(&paths).await?) {
            return Ok(false);
        }

        fs::remove_dir_all(paths.root()).await?;
        drop(guard);
        self.forget_lock(paths.id()).await;
        Ok(true)
    }

    /// Number of job workspaces and store settings.
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut entries = fs::read_dir(&self.jobs_root).await?;
        let mut job_count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_job = entry
                .file_name()
                .to_str()
                .is_some_and(|name| JobId::parse(name).is_ok());
            if is_job {
                job_count += 1;
            }
        }

        Ok(StoreStats {
            job_count,
            jobs_root: self.jobs_root.clone(),
            ttl_secs: self.expiry_policy.ttl().as_secs(),
            expiry_enabled: self.expiry_policy.enabled(),
        })
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

/// Builder for a [`JobStore`].
pub struct JobStoreBuilder {
    jobs_root: Option<PathBuf>,
    expiry_policy: ExpiryPolicy,
}

impl JobStoreBuilder {
    fn new() -> Self {
        Self {
            jobs_root: None,
            expiry_policy: ExpiryPolicy::default(),
        }
    }

    /// Directory that holds every job workspace.
    #[must_use]
    pub fn jobs_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.jobs_root = Some(path.into());
        self
    }

    #[must_use]
    pub fn expiry_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.expiry_policy = policy;
        self
    }

    /// Create (if needed) and secure the jobs root, then build the store.
    ///
    /// # Errors
    /// Returns an error if the jobs root is unset or cannot be created.
    pub async fn build(self) -> Result<JobStore> {
        let jobs_root = self
            .jobs_root
            .ok_or_else(|| SandboxError::Configuration {
                message: "Jobs root is required".to_string(),
            })?;

        fs::create_dir_all(&jobs_root)
            .await
            .map_err(|e| SandboxError::DirectoryCreation {
                path: jobs_root.clone(),
                source: e,
            })?;
        set_secure_permissions(&jobs_root).await?;
        let jobs_root = fs::canonicalize(&jobs_root).await?;

        tracing::info!(
            "JobStore initialized - jobs_root: {:?}, ttl: {:?}, expiry_enabled: {}",
            jobs_root,
            self.expiry_policy.ttl(),
            self.expiry_policy.enabled()
        );

        Ok(JobStore {
            jobs_root,
            expiry_policy: self.expiry_policy,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}
