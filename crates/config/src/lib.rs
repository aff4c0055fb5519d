//! Configuration loading, validation, and management for Helmsman.
//!
//! Loads configuration from `~/.helmsman/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! The tool server descriptor file (a separate JSON document) is modelled in
//! [`descriptor`].

pub mod descriptor;

pub use descriptor::{DescriptorError, DescriptorFile, ServerEntry};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.helmsman/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ordered model provider chain, consulted first to last
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderEntry>,

    /// Router behaviour (batching, caching, sampling)
    #[serde(default)]
    pub router: RouterConfig,

    /// Tool server discovery and connection settings
    #[serde(default)]
    pub servers: ServersConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Metering
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// One entry of the provider failover chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Provider name ("openai", "anthropic", "google", "openrouter", "ollama", ...)
    pub provider: String,

    /// Model to request from this provider
    pub model: String,

    /// Explicit credential; when absent the environment is consulted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Per-request timeout before failing over
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderEntry {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            api_url: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_provider_timeout() -> u64 {
    120
}

fn default_providers() -> Vec<ProviderEntry> {
    vec![
        ProviderEntry::new("openai", default_model_for("openai")),
        ProviderEntry::new("anthropic", default_model_for("anthropic")),
        ProviderEntry::new("google", default_model_for("google")),
    ]
}

/// A sensible default model for well-known providers.
pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4o",
        "anthropic" => "claude-sonnet-4-20250514",
        "google" | "gemini" => "gemini-2.0-flash",
        "openrouter" => "anthropic/claude-sonnet-4",
        "groq" => "llama-3.3-70b-versatile",
        "deepseek" => "deepseek-chat",
        "ollama" => "llama3.1",
        _ => "default",
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Coalesce concurrent non-streaming requests
    #[serde(default = "default_true")]
    pub batching: bool,

    /// Debounce window for collecting a batch
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Dispatch as soon as this many requests are pending
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Maximum cached responses before the oldest is evicted
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Skip the response cache for every request
    #[serde(default)]
    pub fast_mode: bool,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_true() -> bool {
    true
}
fn default_batch_window_ms() -> u64 {
    50
}
fn default_max_batch_size() -> usize {
    8
}
fn default_cache_capacity() -> usize {
    256
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batching: true,
            batch_window_ms: default_batch_window_ms(),
            max_batch_size: default_max_batch_size(),
            cache_enabled: true,
            cache_capacity: default_cache_capacity(),
            fast_mode: false,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersConfig {
    /// JSON file listing named tool servers
    #[serde(default = "default_descriptor_file")]
    pub descriptor_file: PathBuf,

    /// Directory whose subdirectories are scanned for tool servers
    #[serde(default = "default_discovery_dir")]
    pub discovery_dir: PathBuf,

    /// File names that mark a subdirectory as a tool server
    #[serde(default = "default_entry_files")]
    pub entry_files: Vec<String>,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_descriptor_file() -> PathBuf {
    PathBuf::from(".agent/mcp_servers.json")
}
fn default_discovery_dir() -> PathBuf {
    PathBuf::from("mcp_servers")
}
fn default_entry_files() -> Vec<String> {
    ["server.py", "main.py", "server.js", "index.js", "server.ts", "index.ts", "server"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            descriptor_file: default_descriptor_file(),
            discovery_dir: default_discovery_dir(),
            entry_files: default_entry_files(),
            handshake_timeout_secs: default_handshake_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Persona instructions placed at the top of the system prompt
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Directory of `*.md` skill instruction files
    #[serde(default = "default_skills_dir")]
    pub skills_dir: PathBuf,

    #[serde(default = "default_memory_query_tool")]
    pub memory_query_tool: String,

    #[serde(default = "default_memory_store_tool")]
    pub memory_store_tool: String,

    /// Tool used to list the repository for the system prompt
    #[serde(default = "default_listing_tool")]
    pub listing_tool: String,

    /// Tools whose success changes which tools exist
    #[serde(default = "default_refresh_tools")]
    pub refresh_tools: Vec<String>,

    /// History is trimmed to this many messages
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Consecutive synthetic continuations allowed before waiting for input
    #[serde(default = "default_max_auto_steps")]
    pub max_auto_steps: u32,
}

fn default_persona() -> String {
    concat!(
        "You are Helmsman, an autonomous engineering agent. ",
        "You complete tasks by calling tools, never by describing what the user should do."
    )
    .into()
}
fn default_skills_dir() -> PathBuf {
    PathBuf::from(".agent/skills")
}
fn default_memory_query_tool() -> String {
    "memory_query".into()
}
fn default_memory_store_tool() -> String {
    "memory_store".into()
}
fn default_listing_tool() -> String {
    "list_directory".into()
}
fn default_refresh_tools() -> Vec<String> {
    ["start_server", "install_server", "create_server"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_history() -> usize {
    80
}
fn default_max_auto_steps() -> u32 {
    25
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            skills_dir: default_skills_dir(),
            memory_query_tool: default_memory_query_tool(),
            memory_store_tool: default_memory_store_tool(),
            listing_tool: default_listing_tool(),
            refresh_tools: default_refresh_tools(),
            max_history: default_max_history(),
            max_auto_steps: default_max_auto_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.helmsman/config.toml).
    ///
    /// Environment overrides:
    /// - `HELMSMAN_PROVIDER` moves (or inserts) that provider at the head of the chain
    /// - `HELMSMAN_MODEL` replaces the model of the chain's first entry
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    /// Apply `HELMSMAN_*` overrides using the given variable lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("HELMSMAN_PROVIDER") {
            let entry = match self.providers.iter().position(|p| p.provider == provider) {
                Some(idx) => self.providers.remove(idx),
                None => {
                    let model = default_model_for(&provider);
                    ProviderEntry::new(provider, model)
                }
            };
            self.providers.insert(0, entry);
        }

        if let Some(model) = lookup("HELMSMAN_MODEL") {
            if let Some(first) = self.providers.first_mut() {
                first.model = model;
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".helmsman")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one provider entry is required".into(),
            ));
        }

        if let Some(bad) = self.providers.iter().find(|p| p.model.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "provider '{}' has an empty model name",
                bad.provider
            )));
        }

        if self.router.temperature < 0.0 || self.router.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "router.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.router.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "router.max_batch_size must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            router: RouterConfig::default(),
            servers: ServersConfig::default(),
            agent: AgentSettings::default(),
            telemetry: TelemetryConfig::default(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers[0].provider, "openai");
        assert_eq!(config.router.batch_window_ms, 50);
        assert!(config.router.cache_enabled);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.providers.len(), config.providers.len());
        assert_eq!(parsed.router.max_batch_size, config.router.max_batch_size);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.router.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_provider_chain_rejected() {
        let config = AppConfig {
            providers: vec![],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.providers.len(), 3);
    }

    #[test]
    fn provider_chain_order_preserved() {
        let toml_str = r#"
[[providers]]
provider = "anthropic"
model = "claude-sonnet-4-20250514"

[[providers]]
provider = "ollama"
model = "llama3.1"
api_url = "http://localhost:11434/v1"
timeout_secs = 30
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].provider, "anthropic");
        assert_eq!(config.providers[1].timeout_secs, 30);
        assert_eq!(config.providers[0].timeout_secs, 120);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[router]\nbatch_window_ms = 10\nfast_mode = true\n\n[agent]\nmax_history = 12\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.router.batch_window_ms, 10);
        assert!(config.router.fast_mode);
        assert_eq!(config.agent.max_history, 12);
        assert_eq!(config.agent.memory_query_tool, "memory_query");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "providers = 12").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_provider_moves_to_front() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [("HELMSMAN_PROVIDER", "google")].into();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.providers[0].provider, "google");
        assert_eq!(config.providers.len(), 3);
    }

    #[test]
    fn env_unknown_provider_is_inserted_with_model() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> =
            [("HELMSMAN_PROVIDER", "ollama"), ("HELMSMAN_MODEL", "qwen2.5")].into();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.providers[0].provider, "ollama");
        assert_eq!(config.providers[0].model, "qwen2.5");
        assert_eq!(config.providers.len(), 4);
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut entry = ProviderEntry::new("openai", "gpt-4o");
        entry.api_key = Some("sk-secret".into());
        let text = format!("{entry:?}");
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("REDACTED"));
    }
}
