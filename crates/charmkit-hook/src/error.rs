use thiserror::Error;

/// Failure of a single hook tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool does not implement the requested command. Callers may treat
    /// this as "feature not available" rather than a hard failure.
    #[error("unimplemented hook tool: {0}")]
    Unimplemented(String),

    /// The tool ran and reported an error on stderr.
    #[error("{0}")]
    Failed(String),

    /// The tool exited unsuccessfully without saying why.
    #[error("{tool} exited with {status}")]
    ExitStatus {
        tool: String,
        status: std::process::ExitStatus,
    },

    /// The agent reported a non-zero exit code without any stderr text.
    #[error("{tool} exited with code {code}")]
    ExitCode { tool: String, code: i32 },

    /// The RPC connection misbehaved (bad framing, mismatched ids, closed).
    #[error("hook tool rpc error: {0}")]
    Rpc(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, ToolError::Unimplemented(_))
    }
}

/// Failure of the persistent state backing store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid state name {0:?}")]
    InvalidName(String),

    #[error("state IO error at {path}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("state serialization error")]
    Serialization(#[from] serde_json::Error),
}

/// The terminal error of one hook or command invocation.
///
/// Each message names only its own step; the cause is reached through
/// [`source`](std::error::Error::source). Use [`HookError::report`] to
/// print the whole chain.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("required environment variable {0:?} not set")]
    MissingEnv(&'static str),

    #[error("{0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Usage(String),

    #[error("{call}")]
    Tool { call: String, source: ToolError },

    #[error("cannot load state for {namespace}")]
    LoadState {
        namespace: String,
        source: StateError,
    },

    #[error("cannot save state for {namespace}")]
    SaveState {
        namespace: String,
        source: StateError,
    },

    #[error("cannot set context for {namespace}")]
    SetContext {
        namespace: String,
        source: anyhow::Error,
    },

    #[error("hook {hook} failed in {namespace}")]
    Handler {
        hook: String,
        namespace: String,
        source: anyhow::Error,
    },

    #[error("command {name} failed")]
    Command { name: String, source: anyhow::Error },

    #[error("hook {0} is not running in a relation")]
    NotInRelation(String),

    #[error("command {0} panicked")]
    CommandPanicked(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HookError {
    /// Wraps a tool failure with the call that produced it.
    pub fn tool(call: impl Into<String>, source: ToolError) -> Self {
        HookError::Tool {
            call: call.into(),
            source,
        }
    }

    /// Reports whether this error, or the tool failure it wraps, means the
    /// requested tool is not available.
    pub fn is_unimplemented(&self) -> bool {
        match self {
            HookError::Tool { source, .. } => source.is_unimplemented(),
            HookError::Handler { source, .. } | HookError::Command { source, .. } => source
                .chain()
                .filter_map(|e| e.downcast_ref::<ToolError>())
                .any(ToolError::is_unimplemented),
            _ => false,
        }
    }

    /// Precondition errors are detected before any handler runs.
    pub fn is_precondition(&self) -> bool {
        matches!(self, HookError::MissingEnv(_) | HookError::InvalidArgs(_))
    }

    /// The message followed by every cause, colon separated.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            HookError::Usage(_) => 2,
            _ => 1,
        }
    }
}
