//! The per-invocation hook context.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::HookConfig;
use crate::env::{
    ENV_CHARM_DIR, ENV_RELATION_ID, ENV_RELATION_NAME, ENV_REMOTE_UNIT, ENV_UNIT_NAME, ENV_UUID,
    Environment,
};
use crate::error::{HookError, ToolError};
use crate::registry::Registry;
use crate::runner::ToolRunner;

/// Name of a unit, e.g. `wordpress/0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

/// Identifier of one relation instance, e.g. `db:3`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(String);

macro_rules! string_id {
    ($t:ident) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $t {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(UnitId);
string_id!(RelationId);

/// Settings one unit published on one relation.
pub type Settings = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Maintenance,
    Blocked,
    Waiting,
    Active,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Maintenance => "maintenance",
            Status::Blocked => "blocked",
            Status::Waiting => "waiting",
            Status::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Everything a handler knows about the invocation it runs in.
///
/// Relation membership and settings for every relation declared in the
/// registry are fetched once, when the context is built, and do not change
/// for the rest of the invocation.
pub struct Context {
    uuid: String,
    unit: UnitId,
    charm_dir: PathBuf,
    hook_name: String,
    relation_name: Option<String>,
    relation_id: Option<RelationId>,
    remote_unit: Option<UnitId>,
    state_dir: PathBuf,
    relation_ids: BTreeMap<String, Vec<RelationId>>,
    relations: BTreeMap<RelationId, BTreeMap<UnitId, Settings>>,
    runner: Box<dyn ToolRunner>,
}

/// Builds the context for event `hook_name` from the environment, using the
/// runner and state directory selected by `config`.
pub fn new_context_from_environment(
    registry: &Registry,
    env: &Environment,
    hook_name: &str,
    config: &HookConfig,
) -> Result<Context, HookError> {
    env.validate_for_hook(hook_name)?;
    let charm_dir = Path::new(env.require(ENV_CHARM_DIR)?);
    let runner = config.build_runner(env)?;
    let state_dir = config.state_dir_for(charm_dir);
    Context::with_runner(registry, env, hook_name, runner, state_dir)
}

impl Context {
    /// Builds the context using an already constructed runner.
    pub fn with_runner(
        registry: &Registry,
        env: &Environment,
        hook_name: &str,
        runner: Box<dyn ToolRunner>,
        state_dir: PathBuf,
    ) -> Result<Self, HookError> {
        if hook_name.is_empty() {
            return Err(HookError::InvalidArgs("no hook name provided".into()));
        }
        env.validate_for_hook(hook_name)?;

        let mut ctxt = Context {
            uuid: env.require(ENV_UUID)?.to_string(),
            unit: env.require(ENV_UNIT_NAME)?.into(),
            charm_dir: PathBuf::from(env.require(ENV_CHARM_DIR)?),
            hook_name: hook_name.to_string(),
            relation_name: env.get(ENV_RELATION_NAME).map(str::to_string),
            relation_id: env.get(ENV_RELATION_ID).map(RelationId::from),
            remote_unit: env.get(ENV_REMOTE_UNIT).map(UnitId::from),
            state_dir,
            relation_ids: BTreeMap::new(),
            relations: BTreeMap::new(),
            runner,
        };
        for name in registry.registered_relations().keys() {
            ctxt.fetch_relation(name)?;
        }
        Ok(ctxt)
    }

    fn fetch_relation(&mut self, name: &str) -> Result<(), HookError> {
        let ids: Vec<RelationId> = self.tool_json(
            format!("cannot get relation ids for relation {name:?}"),
            "relation-ids",
            &["--format", "json", name],
        )?;
        for id in &ids {
            let unit_ids: Vec<UnitId> = self.tool_json(
                format!("cannot get unit ids for relation id {id}"),
                "relation-list",
                &["--format", "json", "-r", id.as_str()],
            )?;
            let mut units = BTreeMap::new();
            for unit in unit_ids {
                let settings: Option<Settings> = self.tool_json(
                    format!("cannot get settings for relation {id}, unit {unit}"),
                    "relation-get",
                    &["--format", "json", "-r", id.as_str(), "-", unit.as_str()],
                )?;
                units.insert(unit, settings.unwrap_or_default());
            }
            tracing::debug!(relation = name, %id, units = units.len(), "relation fetched");
            self.relations.insert(id.clone(), units);
        }
        self.relation_ids.insert(name.to_string(), ids);
        Ok(())
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn charm_dir(&self) -> &Path {
        &self.charm_dir
    }

    pub fn hook_name(&self) -> &str {
        &self.hook_name
    }

    /// Directory under which persistent state is stored.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn is_relation_hook(&self) -> bool {
        self.relation_name.is_some()
    }

    pub fn relation_name(&self) -> Option<&str> {
        self.relation_name.as_deref()
    }

    pub fn relation_id(&self) -> Option<&RelationId> {
        self.relation_id.as_ref()
    }

    /// The unit on the other side of the current relation. Absent outside
    /// relation hooks and in relation-broken.
    pub fn remote_unit(&self) -> Option<&UnitId> {
        self.remote_unit.as_ref()
    }

    /// Active instances of the relation `name`.
    pub fn relation_ids(&self, name: &str) -> &[RelationId] {
        self.relation_ids
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Units taking part in relation instance `id`.
    pub fn relation_units(&self, id: &RelationId) -> Vec<&UnitId> {
        self.relations
            .get(id)
            .map(|units| units.keys().collect())
            .unwrap_or_default()
    }

    pub fn relation_unit_settings(&self, id: &RelationId, unit: &UnitId) -> Option<&Settings> {
        self.relations.get(id)?.get(unit)
    }

    /// The whole snapshot: relation id → unit → settings.
    pub fn relations(&self) -> &BTreeMap<RelationId, BTreeMap<UnitId, Settings>> {
        &self.relations
    }

    /// Reads `key` from the remote unit's settings on the current relation.
    ///
    /// Served from the snapshot; a remote unit that already left the
    /// relation is asked directly.
    pub fn get_relation(&self, key: &str) -> Result<Option<String>, HookError> {
        let (id, unit) = self.current_relation()?;
        let unit = unit.ok_or_else(|| self.not_in_relation())?;
        if let Some(settings) = self.relation_unit_settings(id, unit) {
            return Ok(settings.get(key).cloned());
        }
        self.tool_json(
            format!("cannot get relation setting {key:?}"),
            "relation-get",
            &["--format", "json", "-r", id.as_str(), key, unit.as_str()],
        )
    }

    /// Publishes settings on the current relation.
    pub fn set_relation(&self, pairs: &[(&str, &str)]) -> Result<(), HookError> {
        let (id, _) = self.current_relation()?;
        self.set_relation_with_id(id, pairs)
    }

    /// Publishes settings on relation instance `id`. An empty value deletes
    /// the key.
    pub fn set_relation_with_id(
        &self,
        id: &RelationId,
        pairs: &[(&str, &str)],
    ) -> Result<(), HookError> {
        let assignments: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut args = vec!["-r", id.as_str()];
        args.extend(assignments.iter().map(String::as_str));
        self.run_tool("relation-set", &args)?;
        Ok(())
    }

    /// Returns the value of config option `key`, `None` when it has no value.
    pub fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>, HookError> {
        let value: serde_json::Value = self.tool_json(
            format!("cannot get config option {key:?}"),
            "config-get",
            &["--format", "json", key],
        )?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    pub fn get_all_config(&self) -> Result<serde_json::Map<String, serde_json::Value>, HookError> {
        let all: Option<serde_json::Map<String, serde_json::Value>> = self.tool_json(
            "cannot get charm config",
            "config-get",
            &["--format", "json", "--all"],
        )?;
        Ok(all.unwrap_or_default())
    }

    pub fn get_config_string(&self, key: &str) -> Result<Option<String>, HookError> {
        self.get_config_as(key)
    }

    pub fn get_config_int(&self, key: &str) -> Result<Option<i64>, HookError> {
        self.get_config_as(key)
    }

    pub fn get_config_bool(&self, key: &str) -> Result<Option<bool>, HookError> {
        self.get_config_as(key)
    }

    fn get_config_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, HookError> {
        let Some(value) = self.get_config(key)? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| HookError::tool(format!("config option {key:?}"), ToolError::Json(e)))
    }

    /// Writes `msg` to the orchestrator's unit log.
    pub fn log(&self, msg: &str) -> Result<(), HookError> {
        tracing::info!(hook = %self.hook_name, "{msg}");
        self.run_tool("juju-log", &["--", msg])?;
        Ok(())
    }

    pub fn set_status(&self, status: Status, message: &str) -> Result<(), HookError> {
        self.run_tool("status-set", &[status.as_str(), message])?;
        Ok(())
    }

    pub fn open_port(&self, port: u16, proto: Protocol) -> Result<(), HookError> {
        self.run_tool("open-port", &[&format!("{port}/{proto}")])?;
        Ok(())
    }

    pub fn close_port(&self, port: u16, proto: Protocol) -> Result<(), HookError> {
        self.run_tool("close-port", &[&format!("{port}/{proto}")])?;
        Ok(())
    }

    pub fn private_address(&self) -> Result<String, HookError> {
        self.unit_get("private-address")
    }

    pub fn public_address(&self) -> Result<String, HookError> {
        self.unit_get("public-address")
    }

    fn unit_get(&self, key: &str) -> Result<String, HookError> {
        let out = self.run_tool("unit-get", &[key])?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Runs a hook tool, labelling any failure with the command line.
    pub fn run_tool(&self, tool: &str, args: &[&str]) -> Result<Vec<u8>, HookError> {
        self.runner
            .run(tool, args)
            .map_err(|e| HookError::tool(format!("{tool} {}", args.join(" ")), e))
    }

    pub fn runner(&self) -> &dyn ToolRunner {
        self.runner.as_ref()
    }

    /// Releases the runner's connection to the agent.
    pub fn close(&self) -> Result<(), HookError> {
        self.runner
            .close()
            .map_err(|e| HookError::tool("cannot close hook tool runner", e))
    }

    fn tool_json<T: DeserializeOwned>(
        &self,
        call: impl Into<String>,
        tool: &str,
        args: &[&str],
    ) -> Result<T, HookError> {
        let call = call.into();
        let out = self
            .runner
            .run(tool, args)
            .map_err(|e| HookError::tool(call.clone(), e))?;
        serde_json::from_slice(&out).map_err(|e| HookError::tool(call, ToolError::Json(e)))
    }

    fn current_relation(&self) -> Result<(&RelationId, Option<&UnitId>), HookError> {
        match &self.relation_id {
            Some(id) => Ok((id, self.remote_unit.as_ref())),
            None => Err(self.not_in_relation()),
        }
    }

    fn not_in_relation(&self) -> HookError {
        HookError::NotInRelation(self.hook_name.clone())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("unit", &self.unit)
            .field("hook_name", &self.hook_name)
            .field("relation_id", &self.relation_id)
            .field("remote_unit", &self.remote_unit)
            .field("relations", &self.relations)
            .finish_non_exhaustive()
    }
}
