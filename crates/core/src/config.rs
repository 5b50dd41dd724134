use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::guardrails::GuardrailConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub planner: PlannerConfig,
    pub validation: ValidationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub provider: PlannerProvider,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub min_confidence: f64,
    pub groundedness_floor: f64,
    pub after_hours_start_hour: u32,
    pub after_hours_end_hour: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerProvider {
    Heuristic,
    OpenAi,
    Anthropic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub planner_provider: Option<PlannerProvider>,
    pub planner_model: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://reflex.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            planner: PlannerConfig {
                provider: PlannerProvider::Heuristic,
                api_key: None,
                model: "reflex-planner-v1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            validation: ValidationConfig {
                min_confidence: 0.3,
                groundedness_floor: 0.5,
                after_hours_start_hour: 21,
                after_hours_end_hour: 8,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for PlannerProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::Validation(format!(
                "unsupported planner provider `{other}` (expected heuristic|openai|anthropic)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ValidationConfig {
    /// Maps the tunable thresholds onto the default guardrail term lists.
    pub fn guardrail_config(&self) -> GuardrailConfig {
        GuardrailConfig {
            min_confidence: self.min_confidence,
            groundedness_floor: self.groundedness_floor,
            after_hours_start_hour: self.after_hours_start_hour,
            after_hours_end_hour: self.after_hours_end_hour,
            ..GuardrailConfig::default()
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("reflex.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(planner) = patch.planner {
            if let Some(provider) = planner.provider {
                self.planner.provider = provider;
            }
            if let Some(api_key_value) = planner.api_key {
                self.planner.api_key = Some(secret_value(api_key_value));
            }
            if let Some(model) = planner.model {
                self.planner.model = model;
            }
            if let Some(timeout_secs) = planner.timeout_secs {
                self.planner.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = planner.max_retries {
                self.planner.max_retries = max_retries;
            }
        }

        if let Some(validation) = patch.validation {
            if let Some(min_confidence) = validation.min_confidence {
                self.validation.min_confidence = min_confidence;
            }
            if let Some(groundedness_floor) = validation.groundedness_floor {
                self.validation.groundedness_floor = groundedness_floor;
            }
            if let Some(start_hour) = validation.after_hours_start_hour {
                self.validation.after_hours_start_hour = start_hour;
            }
            if let Some(end_hour) = validation.after_hours_end_hour {
                self.validation.after_hours_end_hour = end_hour;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("REFLEX_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("REFLEX_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("REFLEX_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("REFLEX_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("REFLEX_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REFLEX_PLANNER_PROVIDER") {
            self.planner.provider = value.parse()?;
        }
        if let Some(value) = read_env("REFLEX_PLANNER_API_KEY") {
            self.planner.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("REFLEX_PLANNER_MODEL") {
            self.planner.model = value;
        }
        if let Some(value) = read_env("REFLEX_PLANNER_TIMEOUT_SECS") {
            self.planner.timeout_secs = parse_u64("REFLEX_PLANNER_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("REFLEX_PLANNER_MAX_RETRIES") {
            self.planner.max_retries = parse_u32("REFLEX_PLANNER_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("REFLEX_VALIDATION_MIN_CONFIDENCE") {
            self.validation.min_confidence = parse_f64("REFLEX_VALIDATION_MIN_CONFIDENCE", &value)?;
        }
        if let Some(value) = read_env("REFLEX_VALIDATION_GROUNDEDNESS_FLOOR") {
            self.validation.groundedness_floor =
                parse_f64("REFLEX_VALIDATION_GROUNDEDNESS_FLOOR", &value)?;
        }

        if let Some(value) = read_env("REFLEX_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("REFLEX_SERVER_PORT") {
            self.server.port = parse_u16("REFLEX_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("REFLEX_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("REFLEX_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("REFLEX_LOGGING_LEVEL").or_else(|| read_env("REFLEX_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REFLEX_LOGGING_FORMAT").or_else(|| read_env("REFLEX_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(planner_provider) = overrides.planner_provider {
            self.planner.provider = planner_provider;
        }
        if let Some(planner_model) = overrides.planner_model {
            self.planner.model = planner_model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_planner(&self.planner)?;
        validate_validation(&self.validation)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("reflex.toml"), PathBuf::from("config/reflex.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_planner(planner: &PlannerConfig) -> Result<(), ConfigError> {
    if planner.timeout_secs == 0 || planner.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "planner.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match planner.provider {
        PlannerProvider::OpenAi | PlannerProvider::Anthropic => {
            let missing = planner
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "planner.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        PlannerProvider::Heuristic => {}
    }

    Ok(())
}

fn validate_validation(validation: &ValidationConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&validation.min_confidence) {
        return Err(ConfigError::Validation(
            "validation.min_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&validation.groundedness_floor) {
        return Err(ConfigError::Validation(
            "validation.groundedness_floor must be in range 0.0..=1.0".to_string(),
        ));
    }
    if validation.after_hours_start_hour > 23 || validation.after_hours_end_hour > 23 {
        return Err(ConfigError::Validation(
            "validation after-hours window hours must be in range 0..=23".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    planner: Option<PlannerPatch>,
    validation: Option<ValidationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerPatch {
    provider: Option<PlannerProvider>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidationPatch {
    min_confidence: Option<f64>,
    groundedness_floor: Option<f64>,
    after_hours_start_hour: Option<u32>,
    after_hours_end_hour: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
