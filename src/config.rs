use crate::pipeline::PipelineSettings;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CACHE_DIR: &str = ".docdigest-cache";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CACHE_TTL_HOURS: u64 = 24;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docdigest server and CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL exposing the `rag-*` completion functions.
    pub completion_base_url: String,
    /// Bearer token forwarded to the completion service.
    pub completion_api_key: Option<String>,
    /// Per-request timeout; for the streamed call it bounds the wait for response headers.
    pub completion_timeout: Duration,
    /// Directory holding cached phase snapshots.
    pub cache_dir: String,
    /// Age after which cached snapshots are ignored.
    pub cache_ttl: Duration,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Tunables for every pipeline phase.
    pub pipeline: PipelineSettings,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut pipeline = PipelineSettings::default();

        let analysis = &mut pipeline.analysis;
        override_from_env("PIPELINE_ANALYSIS_BATCH_SIZE", &mut analysis.batch_size)?;
        if let Some(ms) = parse_env_optional::<u64>("PIPELINE_INTER_BATCH_DELAY_MS")? {
            analysis.inter_batch_delay = Duration::from_millis(ms);
        }
        override_from_env("PIPELINE_MAX_ATTEMPTS", &mut analysis.retry.max_attempts)?;
        if let Some(ms) = parse_env_optional::<u64>("PIPELINE_INITIAL_BACKOFF_MS")? {
            analysis.retry.initial_backoff = Duration::from_millis(ms);
        }

        override_from_env(
            "PIPELINE_SECTION_COUNT",
            &mut pipeline.synthesis.section_count,
        )?;

        let consolidation = &mut pipeline.consolidation;
        override_from_env("PIPELINE_TOKEN_THRESHOLD", &mut consolidation.token_threshold)?;
        override_from_env(
            "PIPELINE_GROUP_TRUNCATE_CHARS",
            &mut consolidation.group_truncate_chars,
        )?;
        override_from_env("PIPELINE_MAX_ROUNDS", &mut consolidation.max_rounds)?;
        override_from_env(
            "PIPELINE_FORCED_TRUNCATE_CHARS",
            &mut consolidation.forced_truncate_chars,
        )?;

        if pipeline.analysis.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "PIPELINE_ANALYSIS_BATCH_SIZE".into(),
            ));
        }
        if pipeline.analysis.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("PIPELINE_MAX_ATTEMPTS".into()));
        }
        if pipeline.synthesis.section_count == 0 {
            return Err(ConfigError::InvalidValue("PIPELINE_SECTION_COUNT".into()));
        }

        Ok(Self {
            completion_base_url: load_env("COMPLETION_BASE_URL")?,
            completion_api_key: load_env_optional("COMPLETION_API_KEY"),
            completion_timeout: Duration::from_secs(
                parse_env_optional("COMPLETION_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            cache_dir: load_env_optional("DOCDIGEST_CACHE_DIR")
                .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string()),
            cache_ttl: cache_ttl_from_hours(
                parse_env_optional("DOCDIGEST_CACHE_TTL_HOURS")?.unwrap_or(DEFAULT_CACHE_TTL_HOURS),
            )?,
            server_port: parse_env_optional("SERVER_PORT")?,
            pipeline,
        })
    }
}

fn cache_ttl_from_hours(hours: u64) -> Result<Duration, ConfigError> {
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue("DOCDIGEST_CACHE_TTL_HOURS".into()))
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Some(value) = parse_env_optional(key)? {
        *target = value;
    }
    Ok(())
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        completion_base_url = %config.completion_base_url,
        has_api_key = config.completion_api_key.is_some(),
        cache_dir = %config.cache_dir,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
