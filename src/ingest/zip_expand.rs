//! Blocking zip expansion with per-entry containment checks.
//!
//! Every entry of an archive is planned and checked before the first byte is
//! written. Each target is checked again right before it is written, since
//! the tree may change between the two passes.

use crate::errors::{AppError, AppResult};
use job_sandbox::security::{canonicalize_lenient, ensure_strictly_within};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Nested zips deeper than this are left unexpanded
pub const MAX_NESTED_DEPTH: usize = 4;

/// Bytes that expansion may still produce across one ingest request.
#[derive(Debug, Clone, Copy)]
pub struct ExtractBudget {
    limit: u64,
    used: u64,
}

impl ExtractBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    fn exceeded(&self) -> AppError {
        AppError::payload_too_large("extracted archive content", self.limit)
    }
}

struct PlannedEntry {
    index: usize,
    name: String,
    target: PathBuf,
    is_dir: bool,
}

pub fn is_zip_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Compute and check where `name` would land under `dest`.
fn checked_target(dest: &Path, name: &str, enclosed: &Path) -> AppResult<PathBuf> {
    let mut target = dest.to_path_buf();
    let mut has_segment = false;
    for component in enclosed.components() {
        match component {
            Component::Normal(segment) => {
                target.push(segment);
                has_segment = true;
            }
            Component::CurDir => {}
            _ => return Err(AppError::unsafe_entry(name)),
        }
    }
    if !has_segment {
        return Err(AppError::unsafe_entry(name));
    }
    recheck(dest, name, &target)?;
    Ok(target)
}

fn recheck(dest: &Path, name: &str, target: &Path) -> AppResult<()> {
    let resolved = canonicalize_lenient(target).map_err(|_| AppError::unsafe_entry(name))?;
    ensure_strictly_within(name, &resolved, dest).map_err(|_| AppError::unsafe_entry(name))
}

/// Expand `archive` into `dest`, which must be canonical.
///
/// Fails with `UnsafeArchiveEntry` before writing anything if any entry would
/// land outside `dest`. Nested zips are expanded into their own directory and
/// removed. Returns the number of files written.
pub fn expand(archive: &Path, dest: &Path, budget: &mut ExtractBudget) -> AppResult<usize> {
    expand_at_depth(archive, dest, budget, 0)
}

fn expand_at_depth(
    archive_path: &Path,
    dest: &Path,
    budget: &mut ExtractBudget,
    depth: usize,
) -> AppResult<usize> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;

    let mut plan = Vec::with_capacity(archive.len());
    let mut declared: u64 = 0;
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let name = entry.name().to_string();
        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| AppError::unsafe_entry(&name))?;
        let target = checked_target(dest, &name, &enclosed)?;
        declared = declared.saturating_add(entry.size());
        plan.push(PlannedEntry {
            index,
            name,
            target,
            is_dir: entry.is_dir(),
        });
    }
    if declared > budget.remaining() {
        return Err(budget.exceeded());
    }

    let mut written = 0;
    let mut nested = Vec::new();
    for planned in &plan {
        recheck(dest, &planned.name, &planned.target)?;
        if planned.is_dir {
            std::fs::create_dir_all(&planned.target)?;
            continue;
        }

        if let Some(parent) = planned.target.parent() {
            std::fs::create_dir_all(parent)?;
            let canonical_parent = parent.canonicalize()?;
            if canonical_parent != dest {
                ensure_strictly_within(&planned.name, &canonical_parent, dest)
                    .map_err(|_| AppError::unsafe_entry(&planned.name))?;
            }
        }

        let remaining = budget.remaining();
        let mut entry = archive.by_index(planned.index)?;
        let mut out = File::create(&planned.target)?;
        let copied = std::io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)?;
        out.flush()?;
        if copied > remaining {
            drop(out);
            let _ = std::fs::remove_file(&planned.target);
            return Err(budget.exceeded());
        }
        budget.used += copied;
        written += 1;

        if is_zip_name(&planned.target) {
            nested.push(planned.target.clone());
        }
    }
    debug!(
        "Expanded {} file(s) from {:?} at depth {}",
        written, archive_path, depth
    );

    for inner in nested {
        if depth + 1 >= MAX_NESTED_DEPTH {
            warn!("Leaving nested archive {:?} unexpanded: too deep", inner);
            continue;
        }
        let inner_dest = match inner.parent() {
            Some(parent) => parent.canonicalize()?,
            None => dest.to_path_buf(),
        };
        written += expand_at_depth(&inner, &inner_dest, budget, depth + 1)?;
        std::fs::remove_file(&inner)?;
    }

    Ok(written)
}
