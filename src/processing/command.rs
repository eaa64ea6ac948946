//! External tool invocation with captured output and a hard timeout.
//!
//! A command never raises: spawn failures, non-zero exits and timeouts all
//! come back as a [`CommandOutcome`] for the caller to log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// One external program run: argv, optional working directory, timeout.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Duration,
}

/// Result of running an [`ExternalCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Process ran to completion. `code` is `None` when killed by a signal.
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// Process exceeded its timeout and was killed
    TimedOut { after: Duration },
    /// Process could not be started at all
    SpawnFailed { error: String },
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0), .. })
    }

    /// Exit status as shown in failure log lines.
    pub fn status_label(&self) -> String {
        match self {
            Self::Exited { code: Some(code), .. } => code.to_string(),
            Self::Exited { code: None, .. } => "signal".to_string(),
            Self::TimedOut { .. } => "timeout".to_string(),
            Self::SpawnFailed { error } => format!("could not start: {error}"),
        }
    }
}

impl ExternalCommand {
    pub fn new<S: Into<String>>(program: S, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    #[must_use]
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `$ argv...`, prefixed with the working directory when one is set.
    pub fn display_line(&self) -> String {
        let argv = self.argv().join(" ");
        match &self.cwd {
            Some(cwd) => format!("$ (cwd={}) {argv}", cwd.display()),
            None => format!("$ {argv}"),
        }
    }

    /// Run to completion or until the timeout, whichever comes first.
    ///
    /// On timeout the child is killed (the future owning it is dropped with
    /// `kill_on_drop` set).
    pub async fn run(&self) -> CommandOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        debug!("Running external command: {}", self.display_line());

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => CommandOutcome::Exited {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => {
                warn!("Failed to start {}: {}", self.program, e);
                CommandOutcome::SpawnFailed {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                warn!("{} timed out after {:?}", self.program, self.timeout);
                CommandOutcome::TimedOut {
                    after: self.timeout,
                }
            }
        }
    }
}

/// Locate an executable the way a shell would: paths with a separator are
/// checked directly, bare names are searched on `PATH`.
pub fn which(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
