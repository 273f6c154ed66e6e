//! Engine settings.
//!
//! Settings are explicit values handed to the agent builders - there is no
//! process-global configuration. The shapes are serde-friendly so
//! deployments can load them from JSON (inline or via a file path in
//! an environment variable).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::params::CompletionConfig;

/// Environment variable naming a JSON settings file.
pub const SETTINGS_PATH_ENV: &str = "TASKTREE_SETTINGS";

/// Language-model wiring for one workflow stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// Provider name, e.g. `"openai"`.
    pub provider: String,
    /// Base URL of the provider endpoint.
    #[serde(default)]
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Response token budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whether this stage streams its completions.
    #[serde(default)]
    pub stream: bool,
}

fn default_max_tokens() -> u32 {
    8192
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            base_url: String::new(),
            model: String::new(),
            max_tokens: default_max_tokens(),
            stream: false,
        }
    }
}

impl LlmConfig {
    /// Derive the completion parameters this stage starts from.
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            max_tokens: self.max_tokens,
            stream: self.stream,
            ..Default::default()
        }
    }
}

/// Configuration of one named agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentConfig {
    /// Agent type tag, e.g. `"executor"`.
    pub agent_type: String,
    /// Per-stage language-model wiring, keyed by stage name.
    #[serde(default)]
    pub llm: HashMap<String, LlmConfig>,
}

impl AgentConfig {
    /// Wiring for the given stage; falls back to defaults when the stage
    /// is not configured.
    pub fn llm_config(&self, stage: &str) -> LlmConfig {
        self.llm.get(stage).cloned().unwrap_or_default()
    }
}

/// Top-level settings: named agent configurations.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Agent configurations by agent name.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

impl Settings {
    /// Parse settings from a JSON string.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from the file named by [`SETTINGS_PATH_ENV`]; empty
    /// settings when the variable is unset.
    pub fn from_env() -> EngineResult<Self> {
        match std::env::var(SETTINGS_PATH_ENV) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|err| {
                    EngineError::configuration(format!("cannot read settings file {path}: {err}"))
                })?;
                Self::from_json_str(&raw)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// Configuration for a named agent.
    pub fn agent_config(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    /// Insert or replace an agent configuration.
    pub fn with_agent(mut self, name: impl Into<String>, config: AgentConfig) -> Self {
        self.agents.insert(name.into(), config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_json() {
        let settings = Settings::from_json_str(
            r#"{
                "agents": {
                    "executor": {
                        "agent_type": "reflect",
                        "llm": {
                            "reasoning": {
                                "provider": "openai",
                                "model": "gpt-4o-mini",
                                "stream": true
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let config = settings.agent_config("executor").unwrap();
        assert_eq!(config.agent_type, "reflect");
        let llm = config.llm_config("reasoning");
        assert!(llm.stream);
        assert_eq!(llm.max_tokens, 8192);
    }

    #[test]
    fn test_missing_stage_falls_back_to_defaults() {
        let config = AgentConfig::default();
        let llm = config.llm_config("anything");
        assert_eq!(llm.completion_config(), CompletionConfig::default());
    }
}
