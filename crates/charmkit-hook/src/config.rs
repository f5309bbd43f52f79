use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::env::{ENV_CHARM_DIR, ENV_CONTEXT_ID, ENV_SOCKET_PATH, ENV_TOOL_MODE, Environment};
use crate::error::HookError;
use crate::runner::{ExecToolRunner, SocketToolRunner, ToolRunner};

/// Name of the optional config file inside the charm directory.
pub const CONFIG_FILE_NAME: &str = "charmkit.toml";

const DEFAULT_STATE_DIR_NAME: &str = "charmkit-state";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub tool_mode: ToolMode,
    /// Multiplexer binary to run every tool through, with argv[0] set to
    /// the tool name. Tools are looked up on `PATH` when unset.
    pub tool_binary: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

/// How hook tools are reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    #[default]
    Exec,
    Socket,
}

impl FromStr for ToolMode {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exec" => Ok(ToolMode::Exec),
            "socket" => Ok(ToolMode::Socket),
            other => Err(HookError::Config(format!(
                "unknown tool mode {other:?}, expected \"exec\" or \"socket\""
            ))),
        }
    }
}

impl HookConfig {
    pub fn from_file(path: &Path) -> Result<Self, HookError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HookError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| HookError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Reads `charmkit.toml` from the charm directory, or returns the
    /// defaults when there is none.
    pub fn load(charm_dir: &Path) -> Result<Self, HookError> {
        let path = charm_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let config = Self::from_file(&path)?;
        tracing::debug!(path = %path.display(), ?config, "loaded hook config");
        Ok(config)
    }

    /// Loads the config for the charm named by `env` and applies
    /// environment overrides.
    pub fn from_environment(env: &Environment) -> Result<Self, HookError> {
        let charm_dir = env.require(ENV_CHARM_DIR)?;
        Self::load(Path::new(charm_dir))?.with_env_overrides(env)
    }

    pub fn with_env_overrides(mut self, env: &Environment) -> Result<Self, HookError> {
        if let Some(mode) = env.get(ENV_TOOL_MODE) {
            self.tool_mode = mode.parse()?;
        }
        Ok(self)
    }

    /// The state root: `state_dir` when configured, otherwise a sibling of
    /// the charm directory.
    pub fn state_dir_for(&self, charm_dir: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => charm_dir.join(dir),
            None => charm_dir
                .parent()
                .unwrap_or(charm_dir)
                .join(DEFAULT_STATE_DIR_NAME),
        }
    }

    pub fn build_runner(&self, env: &Environment) -> Result<Box<dyn ToolRunner>, HookError> {
        match self.tool_mode {
            ToolMode::Exec => {
                let mut runner = ExecToolRunner::new();
                if let Some(binary) = &self.tool_binary {
                    runner = runner.with_binary(binary);
                }
                Ok(Box::new(runner))
            }
            ToolMode::Socket => {
                let socket = env.require(ENV_SOCKET_PATH)?;
                let runner = SocketToolRunner::connect(
                    socket,
                    env.require(ENV_CONTEXT_ID)?,
                    env.require(ENV_CHARM_DIR)?,
                )
                .map_err(|e| HookError::tool(format!("cannot connect to {socket}"), e))?;
                tracing::debug!(socket, "connected to agent socket");
                Ok(Box::new(runner))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config: HookConfig = toml::from_str("").unwrap();
        assert_eq!(config, HookConfig::default());
        assert_eq!(config.tool_mode, ToolMode::Exec);
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
tool_mode = "socket"
tool_binary = "/usr/lib/juju/jujuc"
state_dir = "/var/lib/charm-state"
"#;
        let config: HookConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tool_mode, ToolMode::Socket);
        assert_eq!(config.tool_binary, Some(PathBuf::from("/usr/lib/juju/jujuc")));
        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/charm-state")));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(toml::from_str::<HookConfig>(r#"tool_mode = "carrier-pigeon""#).is_err());
        assert!(matches!("pigeon".parse::<ToolMode>(), Err(HookError::Config(_))));
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(HookConfig::load(tmp.path()).unwrap(), HookConfig::default());
    }

    #[test]
    fn load_reads_file_from_charm_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "state_dir = \"state\"\n").unwrap();
        let config = HookConfig::load(tmp.path()).unwrap();
        assert_eq!(config.state_dir_for(tmp.path()), tmp.path().join("state"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "tool_mode = [").unwrap();
        assert!(matches!(HookConfig::load(tmp.path()), Err(HookError::Config(_))));
    }

    #[test]
    fn env_overrides_tool_mode() {
        let env = Environment::from_vars([(ENV_TOOL_MODE, "socket")]);
        let config = HookConfig::default().with_env_overrides(&env).unwrap();
        assert_eq!(config.tool_mode, ToolMode::Socket);

        let env = Environment::from_vars([(ENV_TOOL_MODE, "bogus")]);
        assert!(HookConfig::default().with_env_overrides(&env).is_err());
    }

    #[test]
    fn default_state_dir_is_sibling_of_charm_dir() {
        let config = HookConfig::default();
        assert_eq!(
            config.state_dir_for(Path::new("/var/lib/juju/agents/unit-blog-0/charm")),
            PathBuf::from("/var/lib/juju/agents/unit-blog-0/charmkit-state")
        );
    }

    #[test]
    fn socket_mode_requires_a_reachable_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HookConfig {
            tool_mode: ToolMode::Socket,
            ..HookConfig::default()
        };
        let missing = tmp.path().join("agent.socket");
        let env = Environment::from_vars([
            (ENV_SOCKET_PATH, missing.to_str().unwrap()),
            (ENV_CONTEXT_ID, "ctx"),
            (ENV_CHARM_DIR, "/charm"),
        ]);
        assert!(matches!(
            config.build_runner(&env),
            Err(HookError::Tool { source: crate::error::ToolError::Io(_), .. })
        ));
    }
}
