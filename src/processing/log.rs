//! Flat, ordered log of everything one processing request did.

use super::command::{CommandOutcome, ExternalCommand};
use serde::Serialize;

/// Append-only sequence of log lines; never deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProcessingLog {
    lines: Vec<String>,
}

impl ProcessingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: Into<String>>(&mut self, line: S) {
        self.lines.push(line.into());
    }

    /// Record a finished command: its argv line, then non-blank stdout and
    /// stderr as whole blocks.
    pub fn command(&mut self, command: &ExternalCommand, outcome: &CommandOutcome) {
        self.push(command.display_line());
        if let CommandOutcome::Exited { stdout, stderr, .. } = outcome {
            if !stdout.trim().is_empty() {
                self.push(stdout.clone());
            }
            if !stderr.trim().is_empty() {
                self.push(stderr.clone());
            }
        }
    }

    /// Failure line for a tool run; timeouts are reported distinctly.
    pub fn failure(&mut self, tool: &str, outcome: &CommandOutcome, names: &str) {
        let line = match outcome {
            CommandOutcome::TimedOut { after } => format!(
                "[{tool}] timed out after {} for {names}",
                humantime::format_duration(*after)
            ),
            other => format!("[{tool}] failed ({}) for {names}", other.status_label()),
        };
        self.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
