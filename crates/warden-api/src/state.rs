//! Application state management

use crate::auth::{PasswordConfig, TokenCodec, TokenLifecycle};
use crate::delivery::TokenDelivery;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use warden_core::{AppConfig, Clock, ConfigError};
use warden_store::CredentialStore;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Credential store (already wrapped with the store deadline)
    pub store: Arc<dyn CredentialStore>,
    /// Token issue, resolution and revocation
    pub lifecycle: TokenLifecycle,
    /// Channel for verification and reset credentials
    pub delivery: Arc<dyn TokenDelivery>,
    /// Argon2 cost parameters for new hashes
    pub password_config: PasswordConfig,
    /// Hash verified on logins for unknown emails, built on first use
    pub login_decoy: OnceCell<String>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Build state from validated configuration.
    ///
    /// Fails when the signing secret is missing, so a misconfigured
    /// process never reaches the point of accepting connections.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        delivery: Arc<dyn TokenDelivery>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let secret = config
            .auth
            .jwt_secret
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired("JWT_SECRET".to_string()))?;

        let lifecycle = TokenLifecycle::new(
            store.clone(),
            TokenCodec::new(secret, config.auth.issuer.clone()),
            config.auth.ttls(),
            clock,
            config.auth.lock_stripes,
        );

        Ok(Self {
            config,
            store,
            lifecycle,
            delivery,
            password_config: PasswordConfig::default(),
            login_decoy: OnceCell::new(),
            start_time: Instant::now(),
        })
    }

    pub fn with_password_config(mut self, password_config: PasswordConfig) -> Self {
        self.password_config = password_config;
        self
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::LogDelivery;
    use warden_core::SystemClock;
    use warden_store::MemoryCredentialStore;

    fn build(config: AppConfig) -> Result<AppState, ConfigError> {
        AppState::new(
            config,
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(LogDelivery),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn test_missing_secret_refuses_to_build() {
        assert!(matches!(
            build(AppConfig::default()),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_builds_with_secret() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some("state-secret".to_string());

        let state = build(config).unwrap();
        assert_eq!(state.lifecycle.ttls().refresh, chrono::Duration::days(30));
        assert_eq!(state.store.name(), "memory");
    }
}
