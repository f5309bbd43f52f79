//! Per-invocation dispatch.
//!
//! One process runs one invocation. In event mode the sequence is:
//!
//! ```text
//! load state ─► set contexts ─► event handlers ─► wildcard handlers ─► save state
//! ```
//!
//! State is saved even when a handler fails, so work done by the handlers
//! that succeeded is kept.

use std::rc::Rc;

use crate::command::CommandHandle;
use crate::config::HookConfig;
use crate::context::{Context, new_context_from_environment};
use crate::env::{ENV_CHARM_DIR, Environment};
use crate::error::HookError;
use crate::registry::Registry;
use crate::state::{DiskState, PersistentState};

/// Selects command mode instead of an event name.
pub const COMMAND_PREFIX: &str = "cmd-";

const PROGRAM_NAME: &str = "runhook";

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// `runhook cmd-<name> [arg...]`. `args` keeps the program name first
    /// with the selector removed.
    Command { name: String, args: Vec<String> },
    /// `runhook <event>`.
    Hook { name: String },
}

impl Invocation {
    /// Interprets the process arguments, program name first.
    pub fn parse(args: &[String]) -> Result<Self, HookError> {
        let Some(selector) = args.get(1).filter(|s| !s.is_empty()) else {
            return Err(HookError::InvalidArgs("no hook name provided".into()));
        };
        if let Some(name) = selector.strip_prefix(COMMAND_PREFIX) {
            let mut rest = Vec::with_capacity(args.len() - 1);
            rest.extend(args.iter().take(1).cloned());
            rest.extend(args.iter().skip(2).cloned());
            return Ok(Invocation::Command {
                name: name.to_string(),
                args: rest,
            });
        }
        if args.len() > 2 {
            return Err(HookError::InvalidArgs(format!(
                "unexpected extra arguments running hook {selector:?}: {:?}",
                &args[2..]
            )));
        }
        Ok(Invocation::Hook {
            name: selector.clone(),
        })
    }
}

/// Runs the command registered at `name`. A long-running command hands
/// back its handle instead of blocking.
pub fn run_command(
    registry: &Registry,
    name: &str,
    args: Vec<String>,
) -> Result<Option<CommandHandle>, HookError> {
    registry.seal();
    let Some(command) = registry.command(name) else {
        return Err(usage_error(registry));
    };
    let _span = tracing::info_span!("command", name).entered();
    tracing::debug!(?args, "running command");
    command(args).map_err(|source| HookError::Command {
        name: name.to_string(),
        source,
    })
}

/// Runs every handler registered for the context's event, loading state
/// from `state` before and saving it back after.
///
/// The first failing handler stops the chain and its error is returned,
/// even if saving state fails afterwards.
pub fn run_hook(
    registry: &Registry,
    ctxt: Rc<Context>,
    state: &dyn PersistentState,
) -> Result<(), HookError> {
    registry.seal();
    let hook = ctxt.hook_name().to_string();
    let _span = tracing::info_span!("hook", name = %hook).entered();
    tracing::info!("running hook");

    load_state(registry, state)?;
    for setter in registry.context_setters() {
        (setter.set)(&ctxt).map_err(|source| HookError::SetContext {
            namespace: setter.namespace.clone(),
            source,
        })?;
    }

    let result = run_handlers(registry, &ctxt, &hook);
    match (result, save_state(registry, state)) {
        (Ok(()), Ok(())) => {
            tracing::info!("hook finished");
            Ok(())
        }
        (Ok(()), Err(save_err)) => Err(save_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(save_err)) => {
            tracing::error!(error = %save_err.report(), "cannot save local state");
            Err(err)
        }
    }
}

fn run_handlers(registry: &Registry, ctxt: &Context, hook: &str) -> Result<(), HookError> {
    let handlers = registry.hooks_for(hook);
    if handlers.is_empty() {
        tracing::warn!("hook not registered");
        return Err(usage_error(registry));
    }
    for handler in handlers {
        tracing::debug!(namespace = %handler.namespace, "running handler");
        (handler.run)(ctxt).map_err(|source| HookError::Handler {
            hook: hook.to_string(),
            namespace: handler.namespace.clone(),
            source,
        })?;
    }
    Ok(())
}

fn load_state(registry: &Registry, state: &dyn PersistentState) -> Result<(), HookError> {
    for entry in registry.state_entries() {
        let load_err = |source| HookError::LoadState {
            namespace: entry.namespace.clone(),
            source,
        };
        match state.load(&entry.namespace).map_err(load_err)? {
            Some(data) => {
                entry.slot.decode(&data).map_err(load_err)?;
                tracing::debug!(namespace = %entry.namespace, "state loaded");
            }
            None => tracing::debug!(namespace = %entry.namespace, "no saved state"),
        }
    }
    Ok(())
}

/// Saves every entry even when an earlier one fails; the first failure is
/// returned and the rest are logged.
fn save_state(registry: &Registry, state: &dyn PersistentState) -> Result<(), HookError> {
    let mut first = None;
    for entry in registry.state_entries() {
        let saved = entry
            .slot
            .encode()
            .and_then(|data| state.save(&entry.namespace, &data));
        let Err(source) = saved else {
            continue;
        };
        let err = HookError::SaveState {
            namespace: entry.namespace.clone(),
            source,
        };
        if first.is_none() {
            first = Some(err);
        } else {
            tracing::error!(error = %err.report(), "cannot save local state");
        }
    }
    first.map_or(Ok(()), Err)
}

/// The error for an unknown event or command. Lists every valid selector,
/// commands first, each group sorted.
pub fn usage_error(registry: &Registry) -> HookError {
    let allowed: Vec<String> = registry
        .registered_commands()
        .into_iter()
        .map(|cmd| format!("{COMMAND_PREFIX}{cmd} [arg...]"))
        .chain(registry.registered_hooks())
        .collect();
    let sep = format!("\n\t| {PROGRAM_NAME} ");
    HookError::Usage(format!("usage: {PROGRAM_NAME} {}", allowed.join(&sep)))
}

/// Entry point used by the `runhook` binary: interprets `args` against
/// `env`, runs the requested command or hook, and releases the tool runner.
pub fn run_from_environment(
    registry: &Registry,
    args: &[String],
    env: &Environment,
) -> Result<Option<CommandHandle>, HookError> {
    if registry.is_empty() {
        tracing::warn!("no hooks or commands registered");
    }
    match Invocation::parse(args)? {
        Invocation::Command { name, args } => run_command(registry, &name, args),
        Invocation::Hook { name } => {
            env.validate_for_hook(&name)?;
            let config = HookConfig::from_environment(env)?;
            let ctxt = Rc::new(new_context_from_environment(registry, env, &name, &config)?);
            let state = DiskState::new(ctxt.state_dir());
            tracing::debug!(
                charm_dir = env.get(ENV_CHARM_DIR),
                state_dir = %state.dir().display(),
                "dispatching"
            );
            let result = run_hook(registry, Rc::clone(&ctxt), &state);
            if let Err(e) = ctxt.close() {
                tracing::warn!(error = %e.report(), "cannot close hook tool runner");
            }
            result.map(|()| None)
        }
    }
}
