use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use crate::error::ToolError;
use crate::runner::{ToolRunner, classify_stderr};

/// Runs hook tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct ExecToolRunner {
    /// A multiplexer binary to run instead of resolving each tool on
    /// `PATH`. It receives the tool name as argv[0].
    binary: Option<PathBuf>,
}

impl ExecToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every tool through `binary` (e.g. an installed `jujud`) instead
    /// of the per-tool symlinks.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    fn command(&self, tool: &str) -> Command {
        match &self.binary {
            Some(binary) => {
                let mut cmd = Command::new(binary);
                cmd.arg0(tool);
                cmd
            }
            None => Command::new(tool),
        }
    }
}

impl ToolRunner for ExecToolRunner {
    fn run(&self, tool: &str, args: &[&str]) -> Result<Vec<u8>, ToolError> {
        tracing::trace!(tool, ?args, "exec hook tool");
        let output = self.command(tool).args(args).output()?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_stderr(&stderr).unwrap_or(ToolError::ExitStatus {
            tool: tool.to_string(),
            status: output.status,
        }))
    }

    fn close(&self) -> Result<(), ToolError> {
        Ok(())
    }
}
