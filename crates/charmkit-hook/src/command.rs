//! Long-running command work.
//!
//! A command usually finishes before it returns. One that starts
//! background work (a server, a watcher) hands back a [`CommandHandle`]
//! and the process waits on it before exiting.

use std::thread::JoinHandle;

use tokio_util::sync::CancellationToken;

use crate::error::HookError;

/// Handle to work started by a command.
#[derive(Debug)]
pub struct CommandHandle {
    name: String,
    cancel: CancellationToken,
    join: JoinHandle<anyhow::Result<()>>,
}

impl CommandHandle {
    /// Runs `f` on its own thread. `f` should return soon after the token
    /// it is given is cancelled.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> std::io::Result<Self>
    where
        F: FnOnce(CancellationToken) -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = std::thread::Builder::new()
            .name(format!("cmd-{name}"))
            .spawn(move || f(token))?;
        tracing::debug!(command = %name, "command work started");
        Ok(Self { name, cancel, join })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the work to stop. Does not wait for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token cancelled together with this handle, for wiring into signal
    /// handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the work finishes.
    pub fn wait(self) -> Result<(), HookError> {
        let name = self.name;
        match self.join.join() {
            Ok(Ok(())) => {
                tracing::debug!(command = %name, "command work finished");
                Ok(())
            }
            Ok(Err(source)) => Err(HookError::Command { name, source }),
            Err(_) => Err(HookError::CommandPanicked(name)),
        }
    }
}
