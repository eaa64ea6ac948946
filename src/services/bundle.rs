//! Full-side zip bundles for download.

use crate::errors::AppResult;
use job_sandbox::{JobPaths, JobSide, tree};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;

/// Zip every file of `side` into the job's bundle path and return it.
///
/// The archive is written to a temporary file in the job root and renamed
/// into place, so concurrent downloads never see a half-written bundle.
/// Entry names are forward-slash paths relative to the side root.
pub async fn bundle_side(job: &JobPaths, side: JobSide) -> AppResult<PathBuf> {
    let root = job.side(side).to_path_buf();
    let job_root = job.root().to_path_buf();
    let destination = job.bundle_path(side);

    let (path, count) = tokio::task::spawn_blocking(move || write_bundle(&root, &job_root, destination))
        .await??;
    debug!("Bundled {} file(s) of {} side into {:?}", count, side, path);
    Ok(path)
}

fn write_bundle(root: &Path, job_root: &Path, destination: PathBuf) -> AppResult<(PathBuf, usize)> {
    let files = tree::walk(root)?.file_paths();

    let temp = tempfile::NamedTempFile::new_in(job_root)?;
    let mut zip = zip::ZipWriter::new(temp.reopen()?);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut count = 0;
    for relative in &files {
        let full_path = root.join(relative);
        // Entries may vanish or turn into links between the walk and here
        let Ok(meta) = std::fs::symlink_metadata(&full_path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        zip.start_file(relative.as_str(), options)?;
        let mut source = std::fs::File::open(&full_path)?;
        std::io::copy(&mut source, &mut zip)?;
        count += 1;
    }
    zip.finish()?;

    temp.persist(&destination)
        .map_err(|e| crate::errors::AppError::Io(e.error))?;
    Ok((destination, count))
}
