use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::ToolError;
use crate::runner::ToolRunner;

enum Canned {
    Output(Vec<u8>),
    Unimplemented,
    Failure(String),
}

/// In-memory tool runner for testing. Pre-loaded with responses keyed by
/// the exact command line; every call is recorded.
///
/// An unknown command line is answered as unimplemented, the same way the
/// agent answers a tool it does not know.
#[derive(Default)]
pub struct MemoryToolRunner {
    responses: HashMap<String, Canned>,
    calls: Mutex<Vec<Vec<String>>>,
}

fn key(tool: &str, args: &[&str]) -> String {
    std::iter::once(tool)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

impl MemoryToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `tool args...` with `stdout`.
    pub fn respond(mut self, tool: &str, args: &[&str], stdout: impl Into<Vec<u8>>) -> Self {
        self.responses
            .insert(key(tool, args), Canned::Output(stdout.into()));
        self
    }

    /// Answers `tool args...` with `value` serialized as JSON.
    pub fn respond_json(self, tool: &str, args: &[&str], value: serde_json::Value) -> Self {
        let body = value.to_string();
        self.respond(tool, args, body)
    }

    /// Fails `tool args...` with the given stderr text.
    pub fn fail(mut self, tool: &str, args: &[&str], message: impl Into<String>) -> Self {
        self.responses
            .insert(key(tool, args), Canned::Failure(message.into()));
        self
    }

    /// Answers `tool args...` as an unimplemented tool.
    pub fn unimplemented(mut self, tool: &str, args: &[&str]) -> Self {
        self.responses.insert(key(tool, args), Canned::Unimplemented);
        self
    }

    /// Every call made so far, tool name first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Calls made to `tool`, arguments only.
    pub fn calls_to(&self, tool: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.first().is_some_and(|t| t == tool))
            .map(|call| call[1..].to_vec())
            .collect()
    }
}

impl ToolRunner for MemoryToolRunner {
    fn run(&self, tool: &str, args: &[&str]) -> Result<Vec<u8>, ToolError> {
        let mut call = vec![tool.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().push(call);

        let key = key(tool, args);
        match self.responses.get(&key) {
            Some(Canned::Output(out)) => Ok(out.clone()),
            Some(Canned::Failure(msg)) => Err(ToolError::Failed(msg.clone())),
            Some(Canned::Unimplemented) | None => Err(ToolError::Unimplemented(format!(
                "bad request: unknown command {key:?}"
            ))),
        }
    }

    fn close(&self) -> Result<(), ToolError> {
        Ok(())
    }
}
