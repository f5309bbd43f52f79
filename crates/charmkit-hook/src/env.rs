//! The invocation environment handed over by the orchestrator.

use std::collections::HashMap;

use crate::error::HookError;

pub const ENV_UUID: &str = "JUJU_MODEL_UUID";
pub const ENV_UNIT_NAME: &str = "JUJU_UNIT_NAME";
pub const ENV_CHARM_DIR: &str = "CHARM_DIR";
pub const ENV_CONTEXT_ID: &str = "JUJU_CONTEXT_ID";
pub const ENV_SOCKET_PATH: &str = "JUJU_AGENT_SOCKET";
pub const ENV_RELATION_NAME: &str = "JUJU_RELATION";
pub const ENV_RELATION_ID: &str = "JUJU_RELATION_ID";
pub const ENV_REMOTE_UNIT: &str = "JUJU_REMOTE_UNIT";

/// Overrides the configured tool mode (`exec` or `socket`).
pub const ENV_TOOL_MODE: &str = "CHARMKIT_TOOL_MODE";

const MUST_ENV_VARS: &[&str] = &[
    ENV_UUID,
    ENV_UNIT_NAME,
    ENV_CHARM_DIR,
    ENV_CONTEXT_ID,
    ENV_SOCKET_PATH,
];

// The remote unit is checked separately: it may be gone by the time
// a relation-broken hook runs.
const RELATION_ENV_VARS: &[&str] = &[ENV_RELATION_NAME, ENV_RELATION_ID];

const RELATION_BROKEN_SUFFIX: &str = "-relation-broken";

/// Immutable snapshot of the environment variables of one invocation.
///
/// An empty value is treated exactly like an unset one.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Captures the current process environment.
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(_, v)| !v.is_empty())
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Returns the variable or a precondition error naming it.
    pub fn require(&self, name: &'static str) -> Result<&str, HookError> {
        self.get(name).ok_or(HookError::MissingEnv(name))
    }

    /// Reports whether the orchestrator invoked a relation-scoped event.
    pub fn is_relation_hook(&self) -> bool {
        self.get(ENV_RELATION_NAME).is_some()
    }

    /// Checks that every variable needed to run `hook_name` is present.
    pub fn validate_for_hook(&self, hook_name: &str) -> Result<(), HookError> {
        for &var in MUST_ENV_VARS {
            self.require(var)?;
        }
        if !self.is_relation_hook() {
            return Ok(());
        }
        for &var in RELATION_ENV_VARS {
            self.require(var)?;
        }
        if !hook_name.ends_with(RELATION_BROKEN_SUFFIX) {
            self.require(ENV_REMOTE_UNIT)?;
        }
        Ok(())
    }
}
