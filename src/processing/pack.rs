//! Pack request validation and source staging.
//!
//! Everything here runs before the output side is touched, so a bad request
//! aborts without mutating anything. The staged copy lives in the job root,
//! outside both sides, which also makes packing a source that sits inside the
//! output side safe against the output being cleared.

use crate::errors::{AppError, AppResult};
use job_sandbox::{JobPaths, JobSide, RelativePath, tree::MAX_TREE_DEPTH};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PACK_STAGING_DIR: &str = "_packroot";
pub const DEFAULT_PACK_NAME: &str = "packed.rpa";
pub const DEFAULT_REPACK_NAME: &str = "repacked.rpa";
pub const DEFAULT_KEY_HEX: &str = "0xDEADBEEF";
pub const DEFAULT_VERSION: u8 = 3;
pub const MAX_PADDING: u32 = 1_000_000;

/// Parameters of a pack or repack operation.
#[derive(Debug, Clone, Deserialize)]
pub struct PackRequest {
    #[serde(default)]
    pub source_where: JobSide,
    #[serde(default)]
    pub source_path: String,
    #[serde(default = "default_repack_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default = "default_key_hex")]
    pub key_hex: String,
    #[serde(default)]
    pub padding: u32,
}

fn default_repack_name() -> String {
    DEFAULT_REPACK_NAME.to_string()
}

fn default_version() -> u8 {
    DEFAULT_VERSION
}

fn default_key_hex() -> String {
    DEFAULT_KEY_HEX.to_string()
}

impl PackRequest {
    /// Defaults used by the `pack_rpa` processing mode: whole input side into `packed.rpa`.
    pub fn for_process() -> Self {
        Self {
            source_where: JobSide::Input,
            name: DEFAULT_PACK_NAME.to_string(),
            ..Self::for_repack()
        }
    }

    /// Defaults used by the repack route: whole output side into `repacked.rpa`.
    pub fn for_repack() -> Self {
        Self {
            source_where: JobSide::Output,
            source_path: String::new(),
            name: DEFAULT_REPACK_NAME.to_string(),
            version: DEFAULT_VERSION,
            key_hex: DEFAULT_KEY_HEX.to_string(),
            padding: 0,
        }
    }
}

impl Default for PackRequest {
    fn default() -> Self {
        Self::for_repack()
    }
}

/// Parse a packer key: hexadecimal, optional `0x` prefix.
pub fn parse_key(key_hex: &str) -> AppResult<u64> {
    let trimmed = key_hex.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(AppError::InvalidKey {
            key: key_hex.to_string(),
        });
    }
    u64::from_str_radix(digits, 16).map_err(|_| AppError::InvalidKey {
        key: key_hex.to_string(),
    })
}

/// Archive names are a single safe path segment.
pub fn validate_archive_name(name: &str) -> AppResult<String> {
    let relative = RelativePath::parse(name)?;
    let mut segments = relative.segments();
    match (segments.next(), segments.next()) {
        (Some(single), None) => Ok(single.to_string()),
        _ => Err(AppError::validation(format!(
            "Archive name must be a single file name, got {name:?}"
        ))),
    }
}

/// A validated pack request with its source already staged.
#[derive(Debug, Clone)]
pub struct PackPlan {
    pub staging: PathBuf,
    pub archive_name: String,
    pub version: u8,
    pub key: u64,
    pub padding: u32,
    /// Top-level entries of the staging directory, sorted
    pub entries: Vec<String>,
}

impl PackPlan {
    /// Validate `request` against `job` and stage a copy of the source.
    pub async fn prepare(job: &JobPaths, request: &PackRequest) -> AppResult<Self> {
        let sandbox = job.sandbox(request.source_where)?;
        let source_dir = sandbox.resolve_allow_empty(&request.source_path)?;
        let display_path = if request.source_path.trim().is_empty() {
            format!("{}/", request.source_where)
        } else {
            format!("{}/{}", request.source_where, request.source_path.trim())
        };

        if !tokio::fs::metadata(&source_dir)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(AppError::file_not_found(display_path));
        }

        let key = parse_key(&request.key_hex)?;
        let archive_name = validate_archive_name(&request.name)?;
        if !matches!(request.version, 2 | 3) {
            return Err(AppError::validation(format!(
                "Archive version must be 2 or 3, got {}",
                request.version
            )));
        }
        if request.padding > MAX_PADDING {
            return Err(AppError::validation(format!(
                "Padding must be at most {MAX_PADDING}, got {}",
                request.padding
            )));
        }

        let staging = job.root().join(PACK_STAGING_DIR);
        let entries = {
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || stage_copy(&source_dir, &staging)).await??
        };

        let plan = Self {
            staging,
            archive_name,
            version: request.version,
            key,
            padding: request.padding,
            entries,
        };

        if plan.entries.is_empty() {
            plan.cleanup().await;
            return Err(AppError::EmptySource { path: display_path });
        }

        debug!(
            "Staged {} top-level entries from {} for packing",
            plan.entries.len(),
            display_path
        );
        Ok(plan)
    }

    /// Remove the staging directory. Best effort.
    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.staging).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove pack staging {:?}: {}", self.staging, e);
        }
    }
}

/// Fresh byte-for-byte copy of every regular file below `source` into
/// `staging`, preserving relative structure. Returns sorted top-level names.
fn stage_copy(source: &Path, staging: &Path) -> std::io::Result<Vec<String>> {
    match std::fs::remove_dir_all(staging) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(staging)?;
    copy_files(source, staging, 0)?;

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            entries.push(name.to_string());
        }
    }
    entries.sort();
    Ok(entries)
}

fn copy_files(from: &Path, to: &Path, depth: usize) -> std::io::Result<()> {
    if depth >= MAX_TREE_DEPTH {
        if std::fs::read_dir(from)?.next().is_some() {
            warn!(
                "Pack source deeper than {} levels; not staging {}",
                MAX_TREE_DEPTH,
                from.display()
            );
        }
        return Ok(());
    }
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_files(&entry.path(), &target, depth + 1)?;
        } else if file_type.is_file() {
            std::fs::create_dir_all(to)?;
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_sandbox::JobStore;

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("0xDEADBEEF").unwrap(), 0xDEAD_BEEF);
        assert_eq!(parse_key("deadbeef").unwrap(), 0xDEAD_BEEF);
        assert_eq!(parse_key(" 0X42 ").unwrap(), 0x42);
        for bad in ["0xZZZZ", "", "0x", "12 34", "-1"] {
            assert!(
                matches!(parse_key(bad), Err(AppError::InvalidKey { .. })),
                "should reject {bad:?}"
            );
        }
    }

    #[test]
    fn test_validate_archive_name() {
        assert_eq!(validate_archive_name("packed.rpa").unwrap(), "packed.rpa");
        assert!(validate_archive_name("dir/packed.rpa").is_err());
        assert!(validate_archive_name("../packed.rpa").is_err());
        assert!(validate_archive_name("").is_err());
    }

    async fn job_with_input() -> (tempfile::TempDir, JobStore, JobPaths) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::builder()
            .jobs_root(temp_dir.path())
            .build()
            .await
            .unwrap();
        let job = store.create_job().await.unwrap();
        std::fs::create_dir_all(job.input().join("game/images")).unwrap();
        std::fs::write(job.input().join("game/script.rpy"), "label start:").unwrap();
        std::fs::write(job.input().join("game/images/bg.png"), [1u8, 2, 3]).unwrap();
        (temp_dir, store, job)
    }

    #[tokio::test]
    async fn test_prepare_stages_copy() {
        let (_temp_dir, _store, job) = job_with_input().await;
        let request = PackRequest {
            source_path: "game".to_string(),
            ..PackRequest::for_process()
        };

        let plan = PackPlan::prepare(&job, &request).await.unwrap();
        assert_eq!(plan.entries, vec!["images".to_string(), "script.rpy".to_string()]);
        assert_eq!(plan.key, 0xDEAD_BEEF);
        assert_eq!(
            std::fs::read(plan.staging.join("images/bg.png")).unwrap(),
            vec![1u8, 2, 3]
        );
        assert!(plan.staging.starts_with(job.root()));
        assert!(!plan.staging.starts_with(job.output()));

        plan.cleanup().await;
        assert!(!plan.staging.exists());
    }

    #[tokio::test]
    async fn test_prepare_replaces_leftover_staging() {
        let (_temp_dir, _store, job) = job_with_input().await;
        let leftover = job.root().join(PACK_STAGING_DIR);
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("stale.rpy"), "old").unwrap();

        let request = PackRequest {
            source_path: "game".to_string(),
            ..PackRequest::for_process()
        };
        let plan = PackPlan::prepare(&job, &request).await.unwrap();

        assert_eq!(plan.entries, vec!["images".to_string(), "script.rpy".to_string()]);
        assert!(!plan.staging.join("stale.rpy").exists());
        plan.cleanup().await;
    }

    #[test]
    fn test_stage_copy_stops_at_depth_limit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("source");
        let mut deepest = source.clone();
        for _ in 0..=MAX_TREE_DEPTH {
            deepest.push("d");
        }
        std::fs::create_dir_all(&deepest).unwrap();
        std::fs::write(source.join("top.rpy"), "top").unwrap();
        std::fs::write(source.join("d/shallow.rpy"), "shallow").unwrap();
        std::fs::write(deepest.join("deep.rpy"), "deep").unwrap();

        let staging = temp_dir.path().join("staging");
        let entries = stage_copy(&source, &staging).unwrap();

        assert_eq!(entries, vec!["d".to_string(), "top.rpy".to_string()]);
        assert!(staging.join("d/shallow.rpy").is_file());
        let staged_deep = deepest
            .strip_prefix(&source)
            .map(|relative| staging.join(relative).join("deep.rpy"))
            .unwrap();
        assert!(!staged_deep.exists());
    }

    #[tokio::test]
    async fn test_prepare_rejects_before_staging() {
        let (_temp_dir, _store, job) = job_with_input().await;

        let bad_key = PackRequest {
            key_hex: "0xZZZZ".to_string(),
            ..PackRequest::for_process()
        };
        assert!(matches!(
            PackPlan::prepare(&job, &bad_key).await,
            Err(AppError::InvalidKey { .. })
        ));
        assert!(!job.root().join(PACK_STAGING_DIR).exists());

        let missing = PackRequest {
            source_path: "nope".to_string(),
            ..PackRequest::for_process()
        };
        assert!(matches!(
            PackPlan::prepare(&job, &missing).await,
            Err(AppError::FileNotFound { .. })
        ));

        let escaping = PackRequest {
            source_path: "../output".to_string(),
            ..PackRequest::for_process()
        };
        assert!(matches!(
            PackPlan::prepare(&job, &escaping).await,
            Err(AppError::InvalidPath { .. })
        ));

        let bad_version = PackRequest {
            version: 4,
            ..PackRequest::for_process()
        };
        assert!(matches!(
            PackPlan::prepare(&job, &bad_version).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_source() {
        let (_temp_dir, _store, job) = job_with_input().await;
        std::fs::create_dir_all(job.output().join("empty/nested")).unwrap();

        let request = PackRequest {
            source_where: JobSide::Output,
            source_path: "empty".to_string(),
            ..PackRequest::for_repack()
        };
        assert!(matches!(
            PackPlan::prepare(&job, &request).await,
            Err(AppError::EmptySource { .. })
        ));
        assert!(!job.root().join(PACK_STAGING_DIR).exists());
    }
}
