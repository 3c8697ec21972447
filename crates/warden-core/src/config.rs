//! Warden Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with sensible defaults for development. The signing secret has no default:
//! `AppConfig::validate` must pass before the service accepts connections.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Credential store connection
    pub database: DatabaseConfig,

    /// Token signing and lifetimes
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|message| ConfigError::ParseError { path, message })
    }

    fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.apply_env()
    }

    /// Check invariants that must hold before serving traffic
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.auth.jwt_secret.as_deref() {
            None => return Err(ConfigError::MissingRequired("JWT_SECRET".to_string())),
            Some(secret) if secret.trim().is_empty() => {
                return Err(ConfigError::MissingRequired("JWT_SECRET".to_string()))
            }
            Some(_) => {}
        }

        let lifetimes = [
            (
                "JWT_ACCESS_EXPIRATION_MINUTES",
                self.auth.access_expiration_minutes,
                MAX_LIFETIME_MINUTES,
            ),
            (
                "JWT_REFRESH_EXPIRATION_DAYS",
                self.auth.refresh_expiration_days,
                MAX_LIFETIME_DAYS,
            ),
            (
                "JWT_RESET_PASSWORD_EXPIRATION_MINUTES",
                self.auth.reset_password_expiration_minutes,
                MAX_LIFETIME_MINUTES,
            ),
            (
                "JWT_VERIFY_EMAIL_EXPIRATION_MINUTES",
                self.auth.verify_email_expiration_minutes,
                MAX_LIFETIME_MINUTES,
            ),
        ];
        for (key, value, max) in lifetimes {
            if !(1..=max).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }

        if self.auth.lock_stripes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AUTH_LOCK_STRIPES".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    fn apply_env(mut self) -> Result<Self, ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env::<u16>("API_PORT")? {
            self.server.port = port;
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Store
        if let Ok(backend) = std::env::var("STORE_BACKEND") {
            self.database.backend = backend.parse()?;
        }
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            self.database.surrealdb_url = url;
        }
        if let Ok(user) = std::env::var("SURREALDB_USER") {
            self.database.surrealdb_user = user;
        }
        if let Ok(pass) = std::env::var("SURREALDB_PASS") {
            self.database.surrealdb_pass = pass;
        }
        if let Ok(ns) = std::env::var("SURREALDB_NAMESPACE") {
            self.database.surrealdb_namespace = ns;
        }
        if let Ok(db) = std::env::var("SURREALDB_DATABASE") {
            self.database.surrealdb_database = db;
        }
        if let Some(ms) = parse_env::<u64>("STORE_TIMEOUT_MS")? {
            self.database.timeout_ms = ms;
        }

        // Auth
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Some(v) = parse_env("JWT_ACCESS_EXPIRATION_MINUTES")? {
            self.auth.access_expiration_minutes = v;
        }
        if let Some(v) = parse_env("JWT_REFRESH_EXPIRATION_DAYS")? {
            self.auth.refresh_expiration_days = v;
        }
        if let Some(v) = parse_env("JWT_RESET_PASSWORD_EXPIRATION_MINUTES")? {
            self.auth.reset_password_expiration_minutes = v;
        }
        if let Some(v) = parse_env("JWT_VERIFY_EMAIL_EXPIRATION_MINUTES")? {
            self.auth.verify_email_expiration_minutes = v;
        }
        if let Some(v) = parse_env("AUTH_LOCK_STRIPES")? {
            self.auth.lock_stripes = v;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env::<bool>("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5004,
            // Empty by default - set via CORS_ORIGINS env var
            cors_origins: vec![],
        }
    }
}

/// Which credential store implementation to run against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; contents are lost on restart
    #[default]
    Memory,
    SurrealDb,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "surrealdb" | "surreal" => Ok(Self::SurrealDb),
            _ => Err(ConfigError::InvalidValue {
                key: "STORE_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Credential store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,

    /// SurrealDB WebSocket URL
    pub surrealdb_url: String,

    /// SurrealDB username
    pub surrealdb_user: String,

    /// SurrealDB password
    pub surrealdb_pass: String,

    /// SurrealDB namespace
    pub surrealdb_namespace: String,

    /// SurrealDB database name
    pub surrealdb_database: String,

    /// Upper bound for a single store round trip, in milliseconds
    pub timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            surrealdb_url: "ws://localhost:8000".to_string(),
            surrealdb_user: "root".to_string(),
            surrealdb_pass: "root".to_string(),
            surrealdb_namespace: "warden".to_string(),
            surrealdb_database: "accounts".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Upper bound for lifetimes configured in minutes (one year)
const MAX_LIFETIME_MINUTES: i64 = 60 * 24 * 365;

/// Upper bound for lifetimes configured in days (ten years)
const MAX_LIFETIME_DAYS: i64 = 365 * 10;

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret. Required; there is no fallback value.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,

    /// `iss` claim written into and required from every credential
    pub issuer: String,

    /// Access token lifetime, minutes
    pub access_expiration_minutes: i64,

    /// Session (refresh) token lifetime, days
    pub refresh_expiration_days: i64,

    /// Password reset token lifetime, minutes
    pub reset_password_expiration_minutes: i64,

    /// Email verification token lifetime, minutes
    pub verify_email_expiration_minutes: i64,

    /// Number of per-user lock stripes serializing token writes
    pub lock_stripes: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: "warden".to_string(),
            access_expiration_minutes: 30,
            refresh_expiration_days: 30,
            reset_password_expiration_minutes: 10,
            verify_email_expiration_minutes: 10,
            lock_stripes: 64,
        }
    }
}

impl AuthConfig {
    pub fn ttls(&self) -> TokenTtls {
        TokenTtls {
            access: Duration::minutes(self.access_expiration_minutes),
            refresh: Duration::days(self.refresh_expiration_days),
            reset_password: Duration::minutes(self.reset_password_expiration_minutes),
            verify_email: Duration::minutes(self.verify_email_expiration_minutes),
        }
    }
}

/// Token lifetimes per purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub access: Duration,
    pub refresh: Duration,
    pub reset_password: Duration,
    pub verify_email: Duration,
}

impl Default for TokenTtls {
    fn default() -> Self {
        AuthConfig::default().ttls()
    }
}

impl TokenTtls {
    /// Lifetime used when minting a token for `purpose`
    pub fn for_purpose(&self, purpose: crate::TokenPurpose) -> Duration {
        match purpose {
            crate::TokenPurpose::Refresh => self.refresh,
            crate::TokenPurpose::VerifyEmail => self.verify_email,
            crate::TokenPurpose::ResetPassword => self.reset_password,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
