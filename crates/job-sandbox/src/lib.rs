//! # Job Sandbox
//!
//! Isolated, time-limited job workspaces on local disk.
//!
//! Every job lives in its own directory below a single jobs root and has an
//! `input` and an `output` side plus a `meta.json` record whose modification
//! time is the job's last access. Client supplied paths are only ever used
//! after passing through a [`PathSandbox`], which validates them syntactically
//! and re-checks containment after canonicalization so symlinks cannot escape.
//!
//! ## Features
//!
//! - **Job lifecycle**: create, resolve, touch, delete and expire workspaces
//! - **Path validation**: `[A-Za-z0-9_./-]` only, no absolute paths, no `..`
//! - **Containment**: canonicalized results must be strictly below the root
//! - **Per-job locking**: exclusive guards for mutation, shared guards for reads
//! - **Tree snapshots**: ordered, serializable directory listings
//! - **Expiry**: TTL based sweeping with a cancellable background [`Janitor`]
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use job_sandbox::{ExpiryPolicy, JobSide, JobStore, tree};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = JobStore::builder()
//!     .jobs_root("/var/tmp/jobs")
//!     .expiry_policy(ExpiryPolicy::new(Duration::from_secs(60 * 60)))
//!     .build()
//!     .await?;
//!
//! let job = store.create_job().await?;
//! let id = job.id().to_string();
//!
//! // Mutations hold the exclusive guard
//! {
//!     let job = store.open_exclusive(&id).await?;
//!     let target = job.sandbox(JobSide::Input)?.resolve("game/script.rpy")?;
//!     tokio::fs::create_dir_all(target.parent().unwrap()).await?;
//!     tokio::fs::write(&target, "label start:").await?;
//!     store.touch(&job).await;
//! }
//!
//! // Reads share the lock
//! let job = store.open_shared(&id).await?;
//! let snapshot = tree::snapshot(job.input().to_path_buf()).await?;
//! println!("{}", serde_json::to_string_pretty(&snapshot)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Path Resolution Examples
//!
//! Given a sandbox root of `/var/tmp/jobs/<id>/output`:
//!
//! ```rust,ignore
//! sandbox.resolve("decompiled/script.rpy")?;   // ok
//! sandbox.resolve("./rpa_extract/images")?;    // ok
//! sandbox.resolve("../input/secret")?;          // InvalidPath
//! sandbox.resolve("/etc/passwd")?;              // InvalidPath
//! sandbox.resolve("link-to-outside/x")?;        // PathEscape
//! sandbox.resolve_allow_empty("")?;             // the root itself
//! ```

pub mod content_type;
pub mod error;
pub mod janitor;
pub mod path;
pub mod policy;
pub mod security;
pub mod store;
pub mod tree;

pub use error::{Result, SandboxError};
pub use janitor::Janitor;
pub use path::{PathSandbox, RelativePath};
pub use policy::ExpiryPolicy;
pub use store::{
    ExclusiveJob, JobGuard, JobId, JobPaths, JobSide, JobStore, JobStoreBuilder, SharedJob,
    StoreStats,
};
pub use tree::TreeNode;
