use std::net::SocketAddr;
use std::time::Duration;

use examdesk_cache::RedisConfig;
use examdesk_db_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};

/// Minimum length of the HS256 signing secret in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config load error: {message}")]
    Load { message: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Cache freshness per repository
    #[serde(default)]
    pub repositories: RepositoriesConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Server validations
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port must be > 0"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("server.request_timeout_ms must be > 0"));
        }
        if self.server.body_limit_bytes == 0 {
            return Err(ConfigError::invalid("server.body_limit_bytes must be > 0"));
        }
        // Storage validations
        if self.storage.backend == StorageBackend::Postgres && self.storage.postgres.pool_size == 0
        {
            return Err(ConfigError::invalid("storage.postgres.pool_size must be > 0"));
        }
        // Cache validations
        if self.cache.mode != CacheMode::Disabled {
            let ns = &self.cache.namespace;
            if ns.is_empty() || ns.ends_with(':') {
                return Err(ConfigError::invalid(
                    "cache.namespace must be non-empty and must not end with ':'",
                ));
            }
            if ns
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']' | '\\'))
            {
                return Err(ConfigError::invalid(
                    "cache.namespace must not contain whitespace or glob characters",
                ));
            }
            if self.cache.op_timeout_ms == 0 {
                return Err(ConfigError::invalid("cache.op_timeout_ms must be > 0"));
            }
            if self.cache.mode == CacheMode::Redis && self.cache.redis.pool_size == 0 {
                return Err(ConfigError::invalid("cache.redis.pool_size must be > 0"));
            }
        }
        if self.repositories.student_ttl_secs == 0 || self.repositories.user_ttl_secs == 0 {
            return Err(ConfigError::invalid("repository cache TTLs must be > 0"));
        }
        // Auth validations
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::invalid(format!(
                "auth.jwt_secret must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::invalid("auth.token_ttl_secs must be > 0"));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline handed to repositories for each request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Redis or Dragonfly
    #[default]
    Redis,
    /// In-process map, single instance only
    Local,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub mode: CacheMode,
    /// Prefix isolating this deployment's keys on a shared server
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    #[serde(default = "default_cache_op_timeout_ms")]
    pub op_timeout_ms: u64,
    #[serde(default)]
    pub redis: RedisConfig,
}

fn default_cache_namespace() -> String {
    "examdesk".into()
}
fn default_cache_op_timeout_ms() -> u64 {
    500
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            namespace: default_cache_namespace(),
            op_timeout_ms: default_cache_op_timeout_ms(),
            redis: RedisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoriesConfig {
    #[serde(default = "default_student_ttl_secs")]
    pub student_ttl_secs: u64,
    #[serde(default = "default_user_ttl_secs")]
    pub user_ttl_secs: u64,
}

fn default_student_ttl_secs() -> u64 {
    300
}
fn default_user_ttl_secs() -> u64 {
    900
}

impl Default for RepositoriesConfig {
    fn default() -> Self {
        Self {
            student_ttl_secs: default_student_ttl_secs(),
            user_ttl_secs: default_user_ttl_secs(),
        }
    }
}

impl RepositoriesConfig {
    pub fn student_ttl(&self) -> Duration {
        Duration::from_secs(self.student_ttl_secs)
    }
    pub fn user_ttl(&self) -> Duration {
        Duration::from_secs(self.user_ttl_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"****")
            .field("issuer", &self.issuer)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

fn default_issuer() -> String {
    "e-exam".into()
}
fn default_token_ttl_secs() -> u64 {
    86_400
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: default_issuer(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, read when present.
    pub const DEFAULT_CONFIG_PATH: &str = "examdesk.toml";

    /// Loads the optional TOML file, applies `EXAMDESK__*` environment overrides and
    /// validates the result.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., EXAMDESK__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("EXAMDESK")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder.build().map_err(|e| ConfigError::Load {
            message: format!("config build error: {e}"),
        })?;
        let merged: AppConfig = cfg.try_deserialize().map_err(|e| ConfigError::Load {
            message: format!("config deserialize error: {e}"),
        })?;
        merged.validate()?;
        Ok(merged)
    }
}
