//! Processor implementations wrapping the external tools.

use super::command::{ExternalCommand, which};
use super::log::ProcessingLog;
use super::pack::PackPlan;
use crate::config::ToolsConfig;
use crate::errors::AppResult;
use job_sandbox::JobPaths;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DECOMPILED_DIR: &str = "decompiled";
pub const RPA_EXTRACT_DIR: &str = "rpa_extract";
pub const RPI_EXTRACT_DIR: &str = "rpi_extract";

/// Everything a processor may look at during one dispatch.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub job: JobPaths,
    pub tools: ToolsConfig,
    pub try_harder: bool,
    pub pack: Option<PackPlan>,
}

/// One handler in the dispatch table.
///
/// Tool failures are recorded in `log`; an `Err` is reserved for internal
/// problems (I/O around the tool) and is turned into a log line by the
/// dispatcher.
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    /// Tag used in log lines
    fn name(&self) -> &'static str;

    /// Lowercase input extension this processor consumes, if it consumes files
    fn input_extension(&self) -> Option<&'static str>;

    async fn run(
        &self,
        ctx: &ProcessContext,
        files: &[PathBuf],
        log: &mut ProcessingLog,
    ) -> AppResult<()>;
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string())
}

/// Runs the decompiler on a copy of each `.rpyc` under `output/decompiled`.
#[derive(Debug, Default)]
pub struct Decompiler;

#[async_trait::async_trait]
impl Processor for Decompiler {
    fn name(&self) -> &'static str {
        "decompile"
    }

    fn input_extension(&self) -> Option<&'static str> {
        Some("rpyc")
    }

    async fn run(
        &self,
        ctx: &ProcessContext,
        files: &[PathBuf],
        log: &mut ProcessingLog,
    ) -> AppResult<()> {
        let dest = ctx.job.output().join(DECOMPILED_DIR);
        tokio::fs::create_dir_all(&dest).await?;

        for file in files {
            let name = display_name(file);
            let copy = dest.join(&name);
            if let Err(e) = tokio::fs::copy(file, &copy).await {
                log.push(format!("[{}] error: could not copy {name}: {e}", self.name()));
                continue;
            }

            let mut command = ExternalCommand::new(&ctx.tools.unrpyc_command, ctx.tools.timeout);
            if ctx.try_harder {
                command = command.arg("--try-harder");
            }
            let command = command.arg_path(&copy);
            let outcome = command.run().await;
            log.command(&command, &outcome);

            if !outcome.success() {
                log.failure("unrpyc", &outcome, &name);
            } else if !tokio::fs::try_exists(copy.with_extension("rpy"))
                .await
                .unwrap_or(false)
            {
                log.push(format!("[unrpyc] no output produced for {name}"));
            } else {
                debug!("Decompiled {}", name);
            }
        }
        Ok(())
    }
}

/// Extracts `.rpa` archives into `output/rpa_extract/<stem>`.
#[derive(Debug, Default)]
pub struct RpaExtractor;

impl RpaExtractor {
    fn command(tools: &ToolsConfig, target: &Path, archive: &Path) -> ExternalCommand {
        let base = if which(&tools.unrpa_command).is_some() {
            ExternalCommand::new(&tools.unrpa_command, tools.timeout)
        } else {
            ExternalCommand::new(&tools.python_command, tools.timeout).args(["-m", "unrpa"])
        };
        base.args(["-m", "-p"]).arg_path(target).arg_path(archive)
    }
}

#[async_trait::async_trait]
impl Processor for RpaExtractor {
    fn name(&self) -> &'static str {
        "extract_rpa"
    }

    fn input_extension(&self) -> Option<&'static str> {
        Some("rpa")
    }

    async fn run(
        &self,
        ctx: &ProcessContext,
        files: &[PathBuf],
        log: &mut ProcessingLog,
    ) -> AppResult<()> {
        let base = ctx.job.output().join(RPA_EXTRACT_DIR);
        for archive in files {
            let target = base.join(file_stem(archive));
            tokio::fs::create_dir_all(&target).await?;

            let command = Self::command(&ctx.tools, &target, archive);
            let outcome = command.run().await;
            log.command(&command, &outcome);
            if !outcome.success() {
                log.failure("unrpa", &outcome, &display_name(archive));
            }
        }
        Ok(())
    }
}

/// Extracts `.rpi` archives into `output/rpi_extract/<stem>`, falling back to
/// a matching `.rpa` data archive when the index alone cannot be read.
#[derive(Debug, Default)]
pub struct RpiExtractor;

impl RpiExtractor {
    fn command(tools: &ToolsConfig, target: &Path, archive: &Path) -> ExternalCommand {
        ExternalCommand::new(&tools.rpatool_command, tools.timeout)
            .arg("-o")
            .arg_path(target)
            .arg("-x")
            .arg_path(archive)
    }

    /// Sibling `<stem>.rpa` first, then `<input>/<stem>.rpa`.
    async fn matching_data_archive(ctx: &ProcessContext, archive: &Path) -> Option<PathBuf> {
        let stem = file_stem(archive);
        let candidates = [
            archive.with_extension("rpa"),
            ctx.job.input().join(format!("{stem}.rpa")),
        ];
        for candidate in candidates {
            if tokio::fs::metadata(&candidate)
                .await
                .is_ok_and(|m| m.is_file())
            {
                return Some(candidate);
            }
        }
        None
    }
}

#[async_trait::async_trait]
impl Processor for RpiExtractor {
    fn name(&self) -> &'static str {
        "extract_rpi"
    }

    fn input_extension(&self) -> Option<&'static str> {
        Some("rpi")
    }

    async fn run(
        &self,
        ctx: &ProcessContext,
        files: &[PathBuf],
        log: &mut ProcessingLog,
    ) -> AppResult<()> {
        let base = ctx.job.output().join(RPI_EXTRACT_DIR);
        for archive in files {
            let target = base.join(file_stem(archive));
            tokio::fs::create_dir_all(&target).await?;

            let command = Self::command(&ctx.tools, &target, archive);
            let outcome = command.run().await;
            log.command(&command, &outcome);
            if outcome.success() {
                continue;
            }

            let mut names = display_name(archive);
            let mut last = outcome;
            if let Some(fallback) = Self::matching_data_archive(ctx, archive).await {
                let fallback_name = display_name(&fallback);
                log.push(format!(
                    "[rpatool] .rpi extract failed; trying matching data archive: {fallback_name}"
                ));
                let retry = Self::command(&ctx.tools, &target, &fallback);
                last = retry.run().await;
                log.command(&retry, &last);
                if last.success() {
                    continue;
                }
                names = format!("{names}, {fallback_name}");
            }
            log.failure("rpatool", &last, &names);
        }
        Ok(())
    }
}

/// Builds one archive from a staged [`PackPlan`] directly into the output side.
#[derive(Debug)]
pub struct Packer {
    label: &'static str,
}

impl Packer {
    /// Packer used by the `pack_rpa` processing mode
    pub fn pack() -> Self {
        Self { label: "pack" }
    }

    /// Packer used by the standalone repack operation
    pub fn repack() -> Self {
        Self { label: "repack" }
    }

    fn command(tools: &ToolsConfig, plan: &PackPlan, archive: &Path) -> ExternalCommand {
        ExternalCommand::new(&tools.rpatool_command, tools.timeout)
            .arg(format!("-{}", plan.version))
            .arg("-k")
            .arg(plan.key.to_string())
            .arg("-p")
            .arg(plan.padding.to_string())
            .arg("-c")
            .arg_path(archive)
            .args(plan.entries.iter().cloned())
            .current_dir(&plan.staging)
    }
}

#[async_trait::async_trait]
impl Processor for Packer {
    fn name(&self) -> &'static str {
        self.label
    }

    fn input_extension(&self) -> Option<&'static str> {
        None
    }

    async fn run(
        &self,
        ctx: &ProcessContext,
        _files: &[PathBuf],
        log: &mut ProcessingLog,
    ) -> AppResult<()> {
        let Some(plan) = &ctx.pack else {
            log.push(format!("[{}] skipped: nothing staged", self.label));
            return Ok(());
        };

        let archive = ctx.job.output().join(&plan.archive_name);
        // A leftover archive would pass for this run's result
        match tokio::fs::remove_file(&archive).await {
            Ok(()) => debug!("Replacing existing archive {}", plan.archive_name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log.push(format!(
                    "[{}] error: could not replace existing {}: {e}",
                    self.label, plan.archive_name
                ));
                return Ok(());
            }
        }

        let command = Self::command(&ctx.tools, plan, &archive);
        let outcome = command.run().await;
        log.command(&command, &outcome);

        let created = tokio::fs::metadata(&archive)
            .await
            .is_ok_and(|m| m.is_file());
        if outcome.success() && created {
            log.push(format!("[{}] created: {}", self.label, plan.archive_name));
        } else if outcome.success() {
            log.push(format!(
                "[{}] failed: {} was not created",
                self.label, plan.archive_name
            ));
        } else {
            log.failure("rpatool", &outcome, &plan.archive_name);
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use job_sandbox::JobStore;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn context(tools: ToolsConfig) -> (tempfile::TempDir, ProcessContext) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::builder()
            .jobs_root(temp_dir.path().join("jobs"))
            .build()
            .await
            .unwrap();
        let job = store.create_job().await.unwrap();
        let ctx = ProcessContext {
            job,
            tools,
            try_harder: false,
            pack: None,
        };
        (temp_dir, ctx)
    }

    fn tools_in(dir: &Path) -> ToolsConfig {
        ToolsConfig {
            unrpyc_command: dir.join("missing-unrpyc").to_string_lossy().into_owned(),
            unrpa_command: dir.join("missing-unrpa").to_string_lossy().into_owned(),
            rpatool_command: dir.join("missing-rpatool").to_string_lossy().into_owned(),
            python_command: dir.join("missing-python").to_string_lossy().into_owned(),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_decompiler_writes_next_to_copy() {
        let bin = tempfile::tempdir().unwrap();
        let mut tools = tools_in(bin.path());
        tools.unrpyc_command = script(
            bin.path(),
            "unrpyc",
            r#"for f in "$@"; do case "$f" in *.rpyc) echo "decompiled" > "${f%.rpyc}.rpy";; esac; done"#,
        );
        let (_temp_dir, ctx) = context(tools).await;
        let source = ctx.job.input().join("script.rpyc");
        std::fs::write(&source, b"\x00bytecode").unwrap();

        let mut log = ProcessingLog::new();
        Decompiler.run(&ctx, &[source], &mut log).await.unwrap();

        let produced = ctx.job.output().join("decompiled/script.rpy");
        assert_eq!(std::fs::read_to_string(produced).unwrap().trim(), "decompiled");
        assert!(log.lines().iter().all(|l| !l.contains("failed")));
    }

    #[tokio::test]
    async fn test_missing_tool_is_logged_not_raised() {
        let bin = tempfile::tempdir().unwrap();
        let (_temp_dir, ctx) = context(tools_in(bin.path())).await;
        let archive = ctx.job.input().join("data.rpa");
        std::fs::write(&archive, b"RPA-3.0").unwrap();

        let mut log = ProcessingLog::new();
        RpaExtractor.run(&ctx, &[archive], &mut log).await.unwrap();

        assert!(log.lines()[0].contains("-m unrpa -m -p"));
        assert!(
            log.lines()
                .last()
                .unwrap()
                .starts_with("[unrpa] failed (could not start")
        );
    }

    #[tokio::test]
    async fn test_rpi_falls_back_to_data_archive() {
        let bin = tempfile::tempdir().unwrap();
        let mut tools = tools_in(bin.path());
        tools.rpatool_command = script(
            bin.path(),
            "rpatool",
            r#"case "$4" in *.rpi) echo "bad index" >&2; exit 1;; esac; mkdir -p "$2"; touch "$2/ok""#,
        );
        let (_temp_dir, ctx) = context(tools).await;
        let index = ctx.job.input().join("images.rpi");
        std::fs::write(&index, b"index").unwrap();
        std::fs::write(ctx.job.input().join("images.rpa"), b"data").unwrap();

        let mut log = ProcessingLog::new();
        RpiExtractor.run(&ctx, &[index], &mut log).await.unwrap();

        assert!(log.lines().iter().any(|l| l
            == "[rpatool] .rpi extract failed; trying matching data archive: images.rpa"));
        assert!(!log.lines().iter().any(|l| l.starts_with("[rpatool] failed")));
        assert!(ctx.job.output().join("rpi_extract/images/ok").exists());
    }

    async fn staged_context(tools: ToolsConfig) -> (tempfile::TempDir, ProcessContext) {
        let (temp_dir, mut ctx) = context(tools).await;
        let staging = ctx.job.root().join("_packroot");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("script.rpy"), b"label start:").unwrap();
        ctx.pack = Some(PackPlan {
            staging,
            archive_name: "patch.rpa".to_string(),
            version: 3,
            key: 0xDEAD_BEEF,
            padding: 0,
            entries: vec!["script.rpy".to_string()],
        });
        (temp_dir, ctx)
    }

    #[tokio::test]
    async fn test_packer_replaces_existing_archive() {
        let bin = tempfile::tempdir().unwrap();
        let mut tools = tools_in(bin.path());
        tools.rpatool_command = script(
            bin.path(),
            "rpatool",
            r#"while [ "$1" != "-c" ]; do shift; done; printf fresh > "$2""#,
        );
        let (_temp_dir, ctx) = staged_context(tools).await;
        let archive = ctx.job.output().join("patch.rpa");
        std::fs::write(&archive, b"stale").unwrap();

        let mut log = ProcessingLog::new();
        Packer::repack().run(&ctx, &[], &mut log).await.unwrap();

        assert!(log.lines().contains(&"[repack] created: patch.rpa".to_string()));
        assert_eq!(std::fs::read(&archive).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_packer_success_without_archive_is_reported() {
        let bin = tempfile::tempdir().unwrap();
        let mut tools = tools_in(bin.path());
        tools.rpatool_command = script(bin.path(), "rpatool", "exit 0");
        let (_temp_dir, ctx) = staged_context(tools).await;
        // Left over from an earlier run; must not count as this run's output
        let archive = ctx.job.output().join("patch.rpa");
        std::fs::write(&archive, b"stale").unwrap();

        let mut log = ProcessingLog::new();
        Packer::repack().run(&ctx, &[], &mut log).await.unwrap();

        assert!(
            log.lines()
                .contains(&"[repack] failed: patch.rpa was not created".to_string())
        );
        assert!(!log.lines().iter().any(|l| l.contains("created: patch.rpa")));
        assert!(!archive.exists());
    }

    #[tokio::test]
    async fn test_packer_tool_failure_is_logged() {
        let bin = tempfile::tempdir().unwrap();
        let mut tools = tools_in(bin.path());
        tools.rpatool_command = script(bin.path(), "rpatool", "echo 'bad key' >&2; exit 2");
        let (_temp_dir, ctx) = staged_context(tools).await;

        let mut log = ProcessingLog::new();
        Packer::pack().run(&ctx, &[], &mut log).await.unwrap();

        assert!(log.lines().iter().any(|l| l.starts_with("[rpatool] failed")));
        assert!(log.lines().iter().any(|l| l.contains("bad key")));
    }

    #[tokio::test]
    async fn test_packer_without_plan_is_skipped() {
        let bin = tempfile::tempdir().unwrap();
        let (_temp_dir, ctx) = context(tools_in(bin.path())).await;
        let mut log = ProcessingLog::new();
        Packer::pack().run(&ctx, &[], &mut log).await.unwrap();
        assert_eq!(log.lines(), &["[pack] skipped: nothing staged".to_string()]);
    }
}
