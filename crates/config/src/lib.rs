//! Mentor configuration.
//!
//! One TOML file (`config.toml` under [`AppConfig::config_dir`]) with a
//! section per component. Every field has a default, so a partial file or
//! no file at all is valid. A few environment variables override the file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.mentor/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default reasoning provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Providers tried after the default one, in order
    #[serde(default)]
    pub fallback_chain: Vec<String>,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Prompt context budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Persistent memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Quality gate
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Session lifetime
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("fallback_chain", &self.fallback_chain)
            .field("providers", &self.providers)
            .field("agent", &self.agent)
            .field("context", &self.context)
            .field("memory", &self.memory)
            .field("verifier", &self.verifier)
            .field("session", &self.session)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model override for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Per-attempt timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Identical consecutive capability names that count as stuck
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: usize,

    /// Iteration budget of a verifier-requested retry
    #[serde(default = "default_retry_max_iterations")]
    pub retry_max_iterations: u32,

    /// No retry once the original run used this many iterations
    #[serde(default = "default_retry_iteration_ceiling")]
    pub retry_iteration_ceiling: u32,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_timeout_ms() -> u64 {
    120_000
}
fn default_stuck_threshold() -> usize {
    3
}
fn default_retry_max_iterations() -> u32 {
    3
}
fn default_retry_iteration_ceiling() -> u32 {
    8
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_ms: default_timeout_ms(),
            stuck_threshold: default_stuck_threshold(),
            retry_max_iterations: default_retry_max_iterations(),
            retry_iteration_ceiling: default_retry_iteration_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,

    /// Fraction of `max_tokens` above which history is compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,

    /// Compressible blocks kept verbatim when compressing
    #[serde(default = "default_keep_recent_blocks")]
    pub keep_recent_blocks: usize,
}

fn default_context_tokens() -> usize {
    32_000
}
fn default_compression_threshold() -> f64 {
    0.7
}
fn default_keep_recent_blocks() -> usize {
    3
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            compression_threshold: default_compression_threshold(),
            keep_recent_blocks: default_keep_recent_blocks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite", "postgres", "memory" or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite file path or Postgres URL; defaults under the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Directory for per-user local cache files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_max_working_memory")]
    pub max_working_memory: usize,

    #[serde(default = "default_max_short_term_memory")]
    pub max_short_term_memory: usize,

    #[serde(default = "default_short_term_ttl_hours")]
    pub short_term_ttl_hours: u64,

    /// Learn preferences from requests
    #[serde(default = "default_true")]
    pub long_term_enabled: bool,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_max_working_memory() -> usize {
    20
}
fn default_max_short_term_memory() -> usize {
    50
}
fn default_short_term_ttl_hours() -> u64 {
    24
}

impl MemoryConfig {
    /// Cache directory, resolved against the config dir when unset.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("cache"))
    }

    /// SQLite database path, resolved against the config dir when unset.
    pub fn resolved_sqlite_path(&self) -> PathBuf {
        self.database_url
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("memory.db"))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            database_url: None,
            cache_dir: None,
            max_working_memory: default_max_working_memory(),
            max_short_term_memory: default_max_short_term_memory(),
            short_term_ttl_hours: default_short_term_ttl_hours(),
            long_term_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Scores below this trigger a retry
    #[serde(default = "default_retry_score_threshold")]
    pub retry_score_threshold: u8,

    /// Score assigned when grading itself fails
    #[serde(default = "default_fallback_score")]
    pub fallback_score: u8,
}

fn default_retry_score_threshold() -> u8 {
    40
}
fn default_fallback_score() -> u8 {
    70
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_score_threshold: default_retry_score_threshold(),
            fallback_score: default_fallback_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions untouched for longer than this are expired on request
    #[serde(default = "default_session_max_age")]
    pub max_age_minutes: u64,
}

fn default_session_max_age() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_minutes: default_session_max_age(),
        }
    }
}

impl AppConfig {
    /// Load `config.toml` from [`AppConfig::config_dir`], then apply
    /// environment overrides.
    ///
    /// The API key is taken from the first of `MENTOR_API_KEY`,
    /// `OPENROUTER_API_KEY` and `OPENAI_API_KEY` when the file has none.
    /// `MENTOR_PROVIDER` and `MENTOR_MODEL` always win over the file.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_dir().join("config.toml"))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = ["MENTOR_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"]
                .into_iter()
                .find_map(|key| lookup(key).filter(|v| !v.trim().is_empty()));
        }
        if let Some(provider) = lookup("MENTOR_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("MENTOR_MODEL") {
            self.default_model = model;
        }
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

    /// `$MENTOR_HOME`, or `~/.mentor` when unset.
    pub fn config_dir() -> PathBuf {
        match std::env::var_os("MENTOR_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".mentor"),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.stuck_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "agent.stuck_threshold must be at least 1".into(),
            ));
        }

        if self.context.compression_threshold <= 0.0 || self.context.compression_threshold > 1.0 {
            return Err(ConfigError::ValidationError(
                "context.compression_threshold must be in (0, 1]".into(),
            ));
        }

        if self.verifier.retry_score_threshold > 100 || self.verifier.fallback_score > 100 {
            return Err(ConfigError::ValidationError(
                "verifier scores must be between 0 and 100".into(),
            ));
        }

        match self.memory.backend.as_str() {
            "sqlite" | "postgres" | "memory" | "none" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown memory.backend \"{other}\""
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            fallback_chain: Vec::new(),
            providers: HashMap::new(),
            agent: AgentConfig::default(),
            context: ContextConfig::default(),
            memory: MemoryConfig::default(),
            verifier: VerifierConfig::default(),
            session: SessionConfig::default(),
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
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.timeout_ms, 120_000);
        assert_eq!(config.agent.stuck_threshold, 3);
        assert_eq!(config.context.max_tokens, 32_000);
        assert_eq!(config.memory.max_working_memory, 20);
        assert_eq!(config.verifier.retry_score_threshold, 40);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.context.max_tokens, config.context.max_tokens);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn unknown_memory_backend_rejected() {
        let mut config = AppConfig::default();
        config.memory.backend = "redis".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_provider = "groq"
fallback_chain = ["openrouter"]

[agent]
max_iterations = 6

[providers.groq]
model = "llama-3.3-70b-versatile"
timeout_secs = 20
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_provider, "groq");
        assert_eq!(config.fallback_chain, vec!["openrouter".to_string()]);
        assert_eq!(config.agent.max_iterations, 6);
        assert_eq!(config.agent.stuck_threshold, 3);
        assert_eq!(config.providers["groq"].timeout_secs, Some(20));
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agent = 12").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_fill_missing_key_and_replace_model() {
        let env: HashMap<&str, &str> = [
            ("MENTOR_API_KEY", "  "),
            ("OPENROUTER_API_KEY", "sk-or"),
            ("OPENAI_API_KEY", "sk-oa"),
            ("MENTOR_MODEL", "anthropic/claude-3.5-haiku"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-or"));
        assert_eq!(config.default_model, "anthropic/claude-3.5-haiku");
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn file_key_is_not_replaced_by_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|_| Some("from-env".into()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("max_iterations"));
    }
}
