//! Configuration for the driving agent
//!
//! Supports configuration via:
//! 1. Config file (~/.config/llmpilot/config.toml)
//! 2. Environment variables (DEFAULT_MODEL_ID, AWS_REGION, etc.)
//! 3. The builder, for programmatic construction
//!
//! Everything ends up in one explicit [`PilotConfig`] handed to the
//! orchestrator at construction; no component reads process-wide state.

use crate::action::{ActionSpace, ActionSpaceType};
use crate::adapters::DEFAULT_SYSTEM_PROMPT;
use crate::orchestrator::{OrchestratorConfig, DEFAULT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// Model selection and prompting
    pub model: ModelSettings,

    /// Inference endpoint settings
    pub endpoint: EndpointSettings,

    /// Vehicle action space
    pub driving: DrivingSettings,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            endpoint: EndpointSettings::default(),
            driving: DrivingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model identifier or inference-profile ARN
    pub model_id: String,

    /// Region for pricing lookups
    pub region: String,

    /// Output token budget per request
    pub max_output_tokens: u32,

    /// System instruction sent with every request
    pub system_prompt: String,

    /// Prompt repeated for each frame
    pub repeated_prompt: String,

    /// Retained conversation turns (0 disables retention)
    pub context_window: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
            region: "eu-central-1".to_string(),
            max_output_tokens: 1000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            repeated_prompt: "Analyze this camera frame and choose the next driving action."
                .to_string(),
            context_window: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Base URL of the inference endpoint
    pub base_url: String,

    /// API key (can also use LLMPILOT_API_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request deadline in milliseconds
    pub timeout_ms: u64,

    /// Price-list query endpoint
    pub pricing_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            base_url: "https://bedrock-runtime.eu-central-1.amazonaws.com".to_string(),
            api_key: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            pricing_url: "https://api.pricing.us-east-1.amazonaws.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivingSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_space: Option<ActionSpace>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_space_type: Option<ActionSpaceType>,
}

impl DrivingSettings {
    /// The configured space with its type, inferring the type from the space
    /// shape when not given explicitly.
    pub fn resolved_action_space(&self) -> Option<(ActionSpace, ActionSpaceType)> {
        self.action_space.as_ref().map(|space| {
            let space_type = self.action_space_type.unwrap_or_else(|| space.space_type());
            (space.clone(), space_type)
        })
    }
}

impl PilotConfig {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("llmpilot")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: PilotConfig = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(arn) = std::env::var("INFERENCE_PROFILE_ARN") {
            self.model.model_id = arn;
        } else if let Ok(model_id) = std::env::var("DEFAULT_MODEL_ID") {
            self.model.model_id = model_id;
        }
        if let Ok(region) = std::env::var("AWS_REGION") {
            self.model.region = region;
        }
        if let Ok(url) = std::env::var("LLMPILOT_BASE_URL") {
            self.endpoint.base_url = url;
        }
        if let Ok(key) = std::env::var("LLMPILOT_API_KEY") {
            self.endpoint.api_key = Some(key);
        }
        if let Ok(max_tokens) = std::env::var("MAX_TOKENS") {
            if let Ok(parsed) = max_tokens.parse() {
                self.model.max_output_tokens = parsed;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.model_id.is_empty() {
            return Err(ConfigError::MissingRequired(
                "model_id must be set in the config file or DEFAULT_MODEL_ID".to_string(),
            ));
        }
        Ok(())
    }

    /// The explicit configuration object the orchestrator consumes.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            model_id: self.model.model_id.clone(),
            region: self.model.region.clone(),
            timeout_ms: self.endpoint.timeout_ms,
            max_output_tokens: self.model.max_output_tokens,
            system_prompt: self.model.system_prompt.clone(),
            max_context_messages: self.model.context_window,
            action_space: self.driving.resolved_action_space(),
        }
    }
}

/// Builder for creating PilotConfig programmatically
pub struct ConfigBuilder {
    config: PilotConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PilotConfig::default(),
        }
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.model.model_id = model_id.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.model.region = region.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.model.system_prompt = prompt.into();
        self
    }

    pub fn context_window(mut self, turns: usize) -> Self {
        self.config.model.context_window = turns;
        self
    }

    pub fn max_output_tokens(mut self, max_tokens: u32) -> Self {
        self.config.model.max_output_tokens = max_tokens;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.endpoint.timeout_ms = timeout_ms;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint.base_url = url.into();
        self
    }

    pub fn action_space(mut self, space: ActionSpace, space_type: ActionSpaceType) -> Self {
        self.config.driving.action_space = Some(space);
        self.config.driving.action_space_type = Some(space_type);
        self
    }

    pub fn build(self) -> PilotConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
