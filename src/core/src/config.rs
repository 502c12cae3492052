use std::collections::BTreeMap;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub version: u32,
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub paths: PathsConfig,
    pub debug: DebugConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            api: ApiConfig::default(),
            chat: ChatConfig::default(),
            paths: PathsConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load `config.toml` from the platform config dir; missing file
    /// falls back to defaults.
    pub fn load() -> Result<Self, String> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| format!("read config.toml: {e}"))?;
        toml::from_str(&raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    pub fn config_path() -> Result<PathBuf, String> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Resolve the sqlite event-log path, creating the data dir if needed.
    pub fn db_path(&self) -> Result<PathBuf, String> {
        if let Some(path) = self.paths.db_path.as_ref() {
            return Ok(PathBuf::from(path));
        }
        let dir = project_dirs()?.data_dir().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| format!("create data dir: {e}"))?;
        Ok(dir.join("relay.db"))
    }

    pub fn debug_enabled(&self) -> bool {
        matches!(std::env::var(&self.debug.debug_env).as_deref(), Ok("1"))
    }
}

fn project_dirs() -> Result<ProjectDirs, String> {
    ProjectDirs::from("", "", "relay").ok_or_else(|| "no home directory".to_string())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub organization_id: String,
    /// Forwarded to the harness in request entries only when non-empty.
    pub auth_headers: BTreeMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://api.relay.local".to_string(),
            organization_id: "default".to_string(),
            auth_headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub default_model: String,
    pub default_cwd: String,
    pub max_steps: u32,
    pub thinking_budget_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: "anthropic:claude-sonnet-4".to_string(),
            default_cwd: ".".to_string(),
            max_steps: 50,
            thinking_budget_tokens: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub debug_env: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            debug_env: "RELAY_DEBUG".to_string(),
        }
    }
}
