//! Configuration loading, validation, and management for reactloop.
//!
//! Loads configuration from `~/.reactloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use reactloop_core::{FINISH_TOOL, ParameterMap, ParameterSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.reactloop/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model gateway settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Loop bounds and sampling settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Remote tool discovery servers
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Tiered capabilities (primary → secondary → synthetic)
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<CapabilityConfig>,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `{api_url}/chat/completions` with bearer auth
    #[default]
    OpenAi,
    /// Azure OpenAI deployments with an `api-key` header
    Azure,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::Azure => f.write_str("azure"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL (OpenAI-style) or resource endpoint (Azure)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model name, or deployment name for Azure
    #[serde(default = "default_model")]
    pub model: String,

    /// Azure `api-version` query parameter
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4.1".into()
}
fn default_api_version() -> String {
    "2024-02-15-preview".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            api_version: default_api_version(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound for one model call
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,

    /// Upper bound for one tool call (each tier has its own, see capabilities)
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Cap on reasoning or raw model text reused as an answer when the
    /// model's output could only be recovered by pattern matching
    #[serde(default = "default_max_fallback_answer_chars")]
    pub max_fallback_answer_chars: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_model_timeout() -> u64 {
    120
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_max_fallback_answer_chars() -> usize {
    500
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            model_timeout_secs: default_model_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            max_fallback_answer_chars: default_max_fallback_answer_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,

    /// Default per-request timeout for servers that don't set their own
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: u64,
}

fn default_discovery_timeout() -> u64 {
    30
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            servers: vec![],
            timeout_secs: default_discovery_timeout(),
        }
    }
}

/// One MCP server reachable over HTTP.
#[derive(Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub label: String,
    pub url: String,

    /// Appended to the URL as `?key=<token>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerConfig")
            .field("label", &self.label)
            .field("url", &self.url)
            .field("service_token", &redact(&self.service_token))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// A logical capability answered by the first tier that succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub name: String,
    pub description: String,

    #[serde(default)]
    pub parameters: ParameterMap,

    /// Candidate tools, most preferred first
    #[serde(default)]
    pub tiers: Vec<TierConfig>,

    /// Produce a low-confidence placeholder when every tier fails
    #[serde(default = "default_true")]
    pub synthetic: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Registered local or discovered remote tool name
    pub tool: String,

    /// Argument template; string values may reference call arguments as `{name}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_capabilities() -> Vec<CapabilityConfig> {
    let mut parameters = ParameterMap::new();
    parameters.insert("city".into(), ParameterSpec::required("City name, e.g. Beijing"));

    let mut search_args = serde_json::Map::new();
    search_args.insert("query".into(), serde_json::Value::String("{city} weather".into()));

    vec![CapabilityConfig {
        name: "weather".into(),
        description: "Get the current weather for a city".into(),
        parameters,
        tiers: vec![
            TierConfig {
                tool: "get_weather".into(),
                arguments: None,
                timeout_secs: None,
            },
            TierConfig {
                tool: "bing_search".into(),
                arguments: Some(search_args),
                timeout_secs: None,
            },
        ],
        synthetic: true,
        synthetic_note: Some("Live weather data is unavailable; do not present this as a forecast.".into()),
    }]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.reactloop/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Variables win over the file.
    ///
    /// - `REACTLOOP_API_KEY`, `AZURE_OPENAI_API_KEY`, `OPENAI_API_KEY` (first set wins)
    /// - `AZURE_OPENAI_ENDPOINT` switches the provider to Azure
    /// - `AZURE_OPENAI_DEPLOYMENT_NAME` / `REACTLOOP_MODEL`
    /// - `AZURE_OPENAI_API_VERSION`
    /// - `MCP_SERVER_URL` (+ `MCP_SERVICE_TOKEN`) sets the `default` server
    /// - `APP_HOST` / `APP_PORT`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("REACTLOOP_API_KEY")
            .or_else(|| var("AZURE_OPENAI_API_KEY"))
            .or_else(|| var("OPENAI_API_KEY"))
        {
            self.provider.api_key = Some(key);
        }

        if let Some(endpoint) = var("AZURE_OPENAI_ENDPOINT") {
            self.provider.kind = ProviderKind::Azure;
            self.provider.api_url = endpoint;
        }

        if let Some(model) = var("REACTLOOP_MODEL").or_else(|| var("AZURE_OPENAI_DEPLOYMENT_NAME")) {
            self.provider.model = model;
        }

        if let Some(version) = var("AZURE_OPENAI_API_VERSION") {
            self.provider.api_version = version;
        }

        if let Some(url) = var("MCP_SERVER_URL") {
            let token = var("MCP_SERVICE_TOKEN");
            match self.discovery.servers.iter_mut().find(|s| s.label == "default") {
                Some(server) => {
                    server.url = url;
                    if token.is_some() {
                        server.service_token = token;
                    }
                }
                None => self.discovery.servers.push(McpServerConfig {
                    label: "default".into(),
                    url,
                    service_token: token,
                    timeout_secs: None,
                }),
            }
        }

        if let Some(host) = var("APP_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = var("APP_PORT").and_then(|p| p.parse().ok()) {
            self.gateway.port = port;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".reactloop")
    }

    /// Get the default configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.model_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be greater than 0".into(),
            ));
        }

        if self.agent.max_fallback_answer_chars == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_fallback_answer_chars must be at least 1".into(),
            ));
        }

        if self.discovery.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "discovery.timeout_secs must be greater than 0".into(),
            ));
        }

        let mut labels = HashSet::new();
        for server in &self.discovery.servers {
            if !labels.insert(server.label.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate discovery server label '{}'",
                    server.label
                )));
            }
            if server.timeout_secs == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "discovery server '{}' has a zero timeout",
                    server.label
                )));
            }
        }

        for cap in &self.capabilities {
            if cap.name == FINISH_TOOL {
                return Err(ConfigError::ValidationError(format!(
                    "capability name '{FINISH_TOOL}' is reserved"
                )));
            }
            if cap.tiers.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "capability '{}' has no tiers",
                    cap.name
                )));
            }
            if let Some(tier) = cap.tiers.iter().find(|t| t.timeout_secs == Some(0)) {
                return Err(ConfigError::ValidationError(format!(
                    "capability '{}' tier '{}' has a zero timeout",
                    cap.name, tier.tool
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `doctor` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            agent: AgentConfig::default(),
            discovery: DiscoveryConfig::default(),
            capabilities: default_capabilities(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for reactloop_core::Error {
    fn from(e: ConfigError) -> Self {
        reactloop_core::Error::Config {
            message: e.to_string(),
        }
    }
}
