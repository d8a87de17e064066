//! Configuration management for Workshop.
//!
//! Configuration is built in layers: compiled defaults, then any number of
//! overlay files applied in order, then environment variables, which win.
//!
//! Recognized environment variables:
//! - `WORKSHOP_BASE_DIR` - Base directory for workspaces and session logs.
//! - `WORKSHOP_HOST` / `WORKSHOP_PORT` - Server bind address.
//! - `WORKSHOP_TOKEN` - Shared bearer token for the session server.
//! - `WORKSHOP_BASE_URL` - Server URL used by the remote client.
//! - `WORKSHOP_USER_ID` - Default user identity for the remote client.
//! - `WORKSHOP_AUTO_APPROVE` - Approve write tools without asking.
//! - `WORKSHOP_MAX_STEPS` - Maximum agent loop steps per turn.
//! - `WORKSHOP_SEARCH_API_KEY` - Key for the JSON search API.
//! - `LLM_BASE_URL` / `LLM_API_KEY` / `LLM_MODEL` - Chat provider.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read config file {0}: {1}")]
    Io(String, String),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(String, String),
}

/// Chat provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-style endpoint base, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Bearer key for the provider
    pub api_key: String,

    /// Model identifier sent with every request
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Agent loop configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum assistant calls per turn
    pub max_steps: usize,

    /// Approve write tools without asking the confirm collaborator
    pub auto_approve: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            auto_approve: false,
        }
    }
}

/// Session server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Shared bearer token; `None` disables auth
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            token: None,
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Base directory for `workspace/`, `workspaces/<user>/` and
    /// `.workshop/sessions/`
    pub base_dir: PathBuf,

    /// Server URL used by the remote client
    pub base_url: Option<String>,

    /// Default user identity for the remote client
    pub user_id: Option<String>,

    /// Key for the JSON search API; absent selects the HTML scraper
    pub search_api_key: Option<String>,

    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
}

/// A partial configuration read from a file. Every field is optional;
/// present fields replace the corresponding value when applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverlay {
    pub base_dir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub search_api_key: Option<String>,
    pub auto_approve: Option<bool>,
    pub max_steps: Option<usize>,
    pub agent: Option<AgentOverlay>,
    pub llm: Option<LlmOverlay>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOverlay {
    pub max_steps: Option<usize>,
    pub auto_approve: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmOverlay {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl Config {
    /// Apply an overlay on top of the current values. Later overlays win.
    pub fn apply(&mut self, overlay: ConfigOverlay) {
        if let Some(v) = overlay.base_dir {
            self.base_dir = v;
        }
        if let Some(v) = overlay.base_url {
            self.base_url = Some(v);
        }
        if let Some(v) = overlay.host {
            self.server.host = v;
        }
        if let Some(v) = overlay.port {
            self.server.port = v;
        }
        if let Some(v) = overlay.token {
            self.server.token = Some(v);
        }
        if let Some(v) = overlay.user_id {
            self.user_id = Some(v);
        }
        if let Some(v) = overlay.search_api_key {
            self.search_api_key = Some(v);
        }
        // Top-level shorthands and the nested `agent` section address the
        // same values; the nested section is applied second so an overlay
        // that carries both resolves to the nested one.
        if let Some(v) = overlay.auto_approve {
            self.agent.auto_approve = v;
        }
        if let Some(v) = overlay.max_steps {
            self.agent.max_steps = v;
        }
        if let Some(agent) = overlay.agent {
            if let Some(v) = agent.max_steps {
                self.agent.max_steps = v;
            }
            if let Some(v) = agent.auto_approve {
                self.agent.auto_approve = v;
            }
        }
        if let Some(llm) = overlay.llm {
            if let Some(v) = llm.base_url {
                self.llm.base_url = v;
            }
            if let Some(v) = llm.api_key {
                self.llm.api_key = v;
            }
            if let Some(v) = llm.model {
                self.llm.model = v;
            }
        }
    }

    /// Apply environment variables. Runs last, so env wins over files.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("WORKSHOP_BASE_DIR") {
            self.base_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WORKSHOP_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("WORKSHOP_PORT") {
            self.server.port = v
                .parse()
                .map_err(|e| ConfigError::InvalidValue("WORKSHOP_PORT".to_string(), format!("{e}")))?;
        }
        if let Ok(v) = std::env::var("WORKSHOP_TOKEN") {
            self.server.token = Some(v);
        }
        if let Ok(v) = std::env::var("WORKSHOP_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("WORKSHOP_USER_ID") {
            self.user_id = Some(v);
        }
        if let Ok(v) = std::env::var("WORKSHOP_SEARCH_API_KEY") {
            self.search_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("WORKSHOP_AUTO_APPROVE") {
            self.agent.auto_approve = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("WORKSHOP_MAX_STEPS") {
            self.agent.max_steps = v.parse().map_err(|e| {
                ConfigError::InvalidValue("WORKSHOP_MAX_STEPS".to_string(), format!("{e}"))
            })?;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        Ok(())
    }

    /// Build a configuration from defaults, the given overlay files in
    /// order, then the environment.
    pub fn load(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for path in paths {
            config.apply(load_overlay(path)?);
        }
        config.apply_env()?;
        Ok(config)
    }

    /// The single-user sandbox directory.
    pub fn local_workspace(&self) -> PathBuf {
        self.base_dir.join("workspace")
    }

    /// The per-user sandbox directory used in server mode.
    pub fn user_workspace(&self, user_id: &str) -> PathBuf {
        self.base_dir.join("workspaces").join(user_id)
    }
}

/// Read one overlay file. `.yaml`/`.yml` parse as YAML, everything else
/// as JSON.
pub fn load_overlay(path: &Path) -> Result<ConfigOverlay, ConfigError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(display.clone(), format!("{e}")))?;

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if ext == "yaml" || ext == "yml" {
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(display, format!("{e}")))
    } else {
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(display, format!("{e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlays_apply_in_order() {
        let mut config = Config::default();
        assert_eq!(config.agent.max_steps, 12);

        let first: ConfigOverlay = serde_json::from_str(r#"{"agent":{"maxSteps":5}}"#).unwrap();
        let second: ConfigOverlay = serde_json::from_str(r#"{"agent":{"maxSteps":9}}"#).unwrap();
        config.apply(first);
        config.apply(second);

        assert_eq!(config.agent.max_steps, 9);
    }

    #[test]
    fn env_wins_over_file_values() {
        let mut config = Config::default();
        let file: ConfigOverlay = serde_json::from_str(r#"{"agent":{"maxSteps":20}}"#).unwrap();
        config.apply(file);
        assert_eq!(config.agent.max_steps, 20);

        std::env::set_var("WORKSHOP_MAX_STEPS", "7");
        config.apply_env().unwrap();
        std::env::remove_var("WORKSHOP_MAX_STEPS");

        assert_eq!(config.agent.max_steps, 7);
    }

    #[test]
    fn nested_llm_overlay() {
        let mut config = Config::default();
        let overlay: ConfigOverlay =
            serde_json::from_str(r#"{"llm":{"baseUrl":"http://localhost:1234/v1","model":"m"}}"#)
                .unwrap();
        config.apply(overlay);
        assert_eq!(config.llm.base_url, "http://localhost:1234/v1");
        assert_eq!(config.llm.model, "m");
        // Untouched fields keep their defaults.
        assert!(config.llm.api_key.is_empty());
    }

    #[test]
    fn yaml_overlay_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workshop.yaml");
        std::fs::write(&path, "agent:\n  maxSteps: 3\nautoApprove: true\n").unwrap();

        let overlay = load_overlay(&path).unwrap();
        let mut config = Config::default();
        config.apply(overlay);

        assert_eq!(config.agent.max_steps, 3);
        assert!(config.agent.auto_approve);
    }
}
