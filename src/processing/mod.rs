//! Processing dispatch
//!
//! A request names a [`ProcessingMode`]; the dispatcher expands it into the
//! concrete modes, validates and stages pack input, replaces the output side
//! with an empty directory, classifies input files by extension and runs each
//! handler from its table in order. Handlers never abort each other: whatever
//! they report ends up in one [`ProcessingLog`].
//!
//! Callers must hold the job's exclusive lock for the whole call.

pub mod command;
pub mod log;
pub mod pack;
pub mod processors;

pub use command::{CommandOutcome, ExternalCommand};
pub use log::ProcessingLog;
pub use pack::{PackPlan, PackRequest};
pub use processors::{Decompiler, Packer, ProcessContext, Processor, RpaExtractor, RpiExtractor};

use crate::config::ToolsConfig;
use crate::errors::AppResult;
use job_sandbox::{JobPaths, TreeNode, tree};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

/// Closed set of processing modes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessingMode {
    /// Every other mode, in table order
    #[default]
    Auto,
    Decompile,
    ExtractRpa,
    ExtractRpi,
    PackRpa,
}

impl ProcessingMode {
    /// Concrete modes to run for this selector.
    pub fn expand(self) -> Vec<ProcessingMode> {
        match self {
            Self::Auto => vec![
                Self::Decompile,
                Self::ExtractRpa,
                Self::ExtractRpi,
                Self::PackRpa,
            ],
            other => vec![other],
        }
    }
}

/// One processing invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub mode: ProcessingMode,
    pub try_harder: bool,
    /// Used only when the expanded modes include `pack_rpa`
    pub pack: Option<PackRequest>,
}

/// Result of a dispatch: the fresh output tree plus everything logged.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub output_tree: TreeNode,
    pub logs: ProcessingLog,
}

/// Mode dispatcher with an explicit handler table.
pub struct Dispatcher {
    tools: ToolsConfig,
    handlers: Vec<(ProcessingMode, Box<dyn Processor>)>,
    repacker: Packer,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.tools)
            .field(
                "handlers",
                &self.handlers.iter().map(|(m, _)| *m).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Dispatcher {
    pub fn new(tools: ToolsConfig) -> Self {
        let handlers: Vec<(ProcessingMode, Box<dyn Processor>)> = vec![
            (ProcessingMode::Decompile, Box::new(Decompiler)),
            (ProcessingMode::ExtractRpa, Box::new(RpaExtractor)),
            (ProcessingMode::ExtractRpi, Box::new(RpiExtractor)),
            (ProcessingMode::PackRpa, Box::new(Packer::pack())),
        ];
        Self {
            tools,
            handlers,
            repacker: Packer::repack(),
        }
    }

    pub fn tools(&self) -> &ToolsConfig {
        &self.tools
    }

    fn handler(&self, mode: ProcessingMode) -> Option<&dyn Processor> {
        self.handlers
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, handler)| handler.as_ref())
    }

    /// Replace the output side with the result of running `request` over the input side.
    ///
    /// Validation failures (pack parameters) abort before the output is touched.
    pub async fn process(&self, job: &JobPaths, request: &ProcessRequest) -> AppResult<ProcessOutcome> {
        let modes = request.mode.expand();

        let pack = if modes.contains(&ProcessingMode::PackRpa) {
            let pack_request = request.pack.clone().unwrap_or_else(PackRequest::for_process);
            Some(PackPlan::prepare(job, &pack_request).await?)
        } else {
            None
        };

        let ctx = ProcessContext {
            job: job.clone(),
            tools: self.tools.clone(),
            try_harder: request.try_harder,
            pack,
        };
        let result = self.run_modes(&ctx, &modes).await;
        if let Some(plan) = &ctx.pack {
            plan.cleanup().await;
        }
        let logs = result?;

        let output_tree = tree::snapshot(job.output().to_path_buf()).await?;
        info!(
            "Processed job {} with mode {} ({} log lines)",
            job.id(),
            request.mode,
            logs.lines().len()
        );
        Ok(ProcessOutcome { output_tree, logs })
    }

    async fn run_modes(&self, ctx: &ProcessContext, modes: &[ProcessingMode]) -> AppResult<ProcessingLog> {
        reset_dir(ctx.job.output()).await?;

        let extensions: Vec<&'static str> = modes
            .iter()
            .filter_map(|m| self.handler(*m))
            .filter_map(|h| h.input_extension())
            .collect();
        let candidates = classify(ctx.job.input().to_path_buf(), extensions).await?;

        let mut log = ProcessingLog::new();
        for mode in modes {
            let Some(handler) = self.handler(*mode) else {
                warn!("No handler registered for mode {}", mode);
                continue;
            };

            let files: &[PathBuf] = match handler.input_extension() {
                Some(ext) => {
                    let files = candidates.get(ext).map(Vec::as_slice).unwrap_or_default();
                    if files.is_empty() {
                        log.push(format!("[{}] No .{ext} files found.", handler.name()));
                        continue;
                    }
                    files
                }
                None => &[],
            };

            debug!("Running {} on {} file(s)", handler.name(), files.len());
            if let Err(e) = handler.run(ctx, files, &mut log).await {
                warn!("Processor {} failed: {}", handler.name(), e);
                log.push(format!("[{}] error: {e}", handler.name()));
            }
        }
        Ok(log)
    }

    /// Pack into the existing output side without clearing it.
    pub async fn repack(&self, job: &JobPaths, request: &PackRequest) -> AppResult<ProcessOutcome> {
        let plan = PackPlan::prepare(job, request).await?;
        let ctx = ProcessContext {
            job: job.clone(),
            tools: self.tools.clone(),
            try_harder: false,
            pack: Some(plan),
        };

        let mut log = ProcessingLog::new();
        let result = async {
            tokio::fs::create_dir_all(job.output()).await?;
            self.repacker.run(&ctx, &[], &mut log).await
        }
        .await;
        if let Some(plan) = &ctx.pack {
            plan.cleanup().await;
        }
        if let Err(e) = result {
            log.push(format!("[{}] error: {e}", self.repacker.name()));
        }

        let output_tree = tree::snapshot(job.output().to_path_buf()).await?;
        Ok(ProcessOutcome {
            output_tree,
            logs: log,
        })
    }
}

async fn reset_dir(dir: &Path) -> AppResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Group regular files under `root` by lowercase extension, sorted per group.
/// Symlinks are not followed.
async fn classify(
    root: PathBuf,
    extensions: Vec<&'static str>,
) -> AppResult<HashMap<&'static str, Vec<PathBuf>>> {
    let groups = tokio::task::spawn_blocking(move || {
        let mut groups: HashMap<&'static str, Vec<PathBuf>> = HashMap::new();
        if !extensions.is_empty() {
            collect(&root, &extensions, &mut groups, 0)?;
        }
        for files in groups.values_mut() {
            files.sort();
        }
        Ok::<_, std::io::Error>(groups)
    })
    .await??;
    Ok(groups)
}

fn collect(
    dir: &Path,
    extensions: &[&'static str],
    groups: &mut HashMap<&'static str, Vec<PathBuf>>,
    depth: usize,
) -> std::io::Result<()> {
    if depth >= tree::MAX_TREE_DEPTH {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect(&path, extensions, groups, depth + 1)?;
        } else if file_type.is_file() {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            if let Some(ext) = ext
                && let Some(matched) = extensions.iter().find(|known| **known == ext)
            {
                groups.entry(*matched).or_default().push(path);
            }
        }
    }
    Ok(())
}
