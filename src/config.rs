//! Immutable configuration snapshot.
//!
//! Loaded once at startup from a TOML file and never reloaded; every
//! component reads its knobs from here. A missing file is not an error;
//! the defaults describe a single root agent with conservative spawn limits
//! and no templates or custom tools.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::custom::CustomToolConfig;
use crate::templates::SessionTemplate;

/// Config filename probed in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "orchestration.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Identity of the agent this server fronts; session keys derive from it.
    pub agent_id: String,
    /// Filesystem root for all persistent state. Defaults to the working
    /// directory (see [`crate::workspace`]).
    pub workspace: Option<PathBuf>,
    /// Gateway RPC endpoint.
    pub gateway_url: Option<String>,
    pub agents: AgentsConfig,
    pub session: SessionConfig,
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: "main".to_string(),
            workspace: None,
            gateway_url: None,
            agents: AgentsConfig::default(),
            session: SessionConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    /// How deep an agent chain may grow before spawns are refused.
    pub max_spawn_depth: u32,
    /// Fan-out cap for a parallel workflow.
    pub max_children_per_agent: usize,
    pub defaults: AgentDefaults,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_spawn_depth: 1,
            max_children_per_agent: 5,
            defaults: AgentDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    pub model: ModelRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl Default for ModelRef {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
        }
    }
}

impl ModelRef {
    /// `<provider>/<model>`, the form the gateway expects.
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub templates: IndexMap<String, SessionTemplate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub custom: Vec<CustomToolConfig>,
}

impl Config {
    /// Load from an explicit path, or probe [`DEFAULT_CONFIG_FILE`]. A
    /// missing file yields the defaults; a present-but-invalid file is an
    /// error rather than a silent fallback.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("config {} invalid: {err}", path.display()))?;
        Ok(config)
    }

    /// The caller agent's main session key.
    pub fn main_session_key(&self) -> String {
        format!("agent:{}:main", self.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.agent_id, "main");
        assert_eq!(config.agents.max_spawn_depth, 1);
        assert_eq!(config.agents.max_children_per_agent, 5);
        assert!(config.session.templates.is_empty());
        assert!(config.tools.custom.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orchestration.toml");
        std::fs::write(
            &path,
            r#"
agentId = "ops"
workspace = "/srv/agents"

[agents]
maxSpawnDepth = 2
maxChildrenPerAgent = 8

[agents.defaults.model]
provider = "anthropic"
model = "claude-opus-4"

[session.templates.deep]
model = "anthropic/claude-opus-4"
thinking = "high"
description = "slow and thorough"

[[tools.custom]]
name = "weather"
description = "Fetch weather"
endpoint = "https://example.test/weather"
method = "GET"

[tools.custom.parameters.city]
type = "string"
required = true
"#,
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.agent_id, "ops");
        assert_eq!(config.main_session_key(), "agent:ops:main");
        assert_eq!(config.agents.max_spawn_depth, 2);
        assert_eq!(config.agents.defaults.model.qualified(), "anthropic/claude-opus-4");
        assert_eq!(config.session.templates["deep"].thinking.as_deref(), Some("high"));
        assert_eq!(config.tools.custom.len(), 1);
        assert_eq!(config.tools.custom[0].name.as_deref(), Some("weather"));
        assert!(config.tools.custom[0].parameters["city"].required);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orchestration.toml");
        std::fs::write(&path, "agentId = [this is not toml]]").unwrap();
        assert!(Config::load(Some(path.as_path())).is_err());
    }
}
