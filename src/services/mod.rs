//! Service layer
//!
//! Job-scoped operations behind the HTTP handlers. [`JobService`] applies the
//! per-job locks and access tracking; the submodules hold the filesystem work.

pub mod bundle;
pub mod files;
pub mod fs_ops;
pub mod jobs;

pub use jobs::{JobService, OpenedFile, PendingUpload};
