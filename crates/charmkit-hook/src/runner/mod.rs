//! Hook tool invocation.
//!
//! Hook tools (`relation-get`, `config-get`, `juju-log`, ...) are the
//! orchestrator's side channel. A [`ToolRunner`] runs one of them and
//! returns its standard output. Two transports are provided:
//!
//! - [`ExecToolRunner`] spawns the tool as a child process, the
//!   conventional way.
//! - [`SocketToolRunner`] sends the same request straight over the unit
//!   agent's RPC socket, which avoids a process spawn per call and can be
//!   exercised without the tools installed.
//!
//! [`MemoryToolRunner`] answers from canned responses for tests.

pub mod exec;
pub mod memory;
pub mod socket;

pub use exec::ExecToolRunner;
pub use memory::MemoryToolRunner;
pub use socket::SocketToolRunner;

use crate::error::ToolError;

/// Runs hook tools on behalf of a [`Context`](crate::Context).
pub trait ToolRunner: Send + Sync {
    /// Runs the named tool and returns its standard output.
    ///
    /// If the tool does not implement the command, the error is
    /// [`ToolError::Unimplemented`].
    fn run(&self, tool: &str, args: &[&str]) -> Result<Vec<u8>, ToolError>;

    /// Releases any connection held by the runner.
    fn close(&self) -> Result<(), ToolError>;
}

impl<R: ToolRunner + ?Sized> ToolRunner for std::sync::Arc<R> {
    fn run(&self, tool: &str, args: &[&str]) -> Result<Vec<u8>, ToolError> {
        (**self).run(tool, args)
    }

    fn close(&self) -> Result<(), ToolError> {
        (**self).close()
    }
}

const ERROR_PREFIX: &str = "error: ";
const BAD_REQUEST_PREFIX: &str = "bad request: ";
const UNKNOWN_COMMAND_MARKER: &str = "unknown command";

/// Turns the stderr text of a failed tool call into an error.
///
/// Returns `None` when the text is blank; the caller then reports the raw
/// failure instead. A leading `error: ` is stripped. Text beginning with
/// `unknown command` (optionally after `bad request: `) is the agent's way
/// of saying it does not know the tool.
pub fn classify_stderr(stderr: &str) -> Option<ToolError> {
    let text = stderr.trim();
    if text.is_empty() {
        return None;
    }
    let text = text.strip_prefix(ERROR_PREFIX).unwrap_or(text);
    let probe = text.strip_prefix(BAD_REQUEST_PREFIX).unwrap_or(text);
    if probe.starts_with(UNKNOWN_COMMAND_MARKER) {
        Some(ToolError::Unimplemented(text.to_string()))
    } else {
        Some(ToolError::Failed(text.to_string()))
    }
}
