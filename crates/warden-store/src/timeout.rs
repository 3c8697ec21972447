//! Round-trip deadline for any credential store
//!
//! Wraps another store so that every call either completes within the
//! configured deadline or fails with `WardenError::Timeout`.

use crate::CredentialStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use warden_core::{ProfileUpdate, Result, TokenRecord, User, WardenError};

/// Store decorator enforcing a per-call deadline
pub struct TimeoutStore {
    inner: Arc<dyn CredentialStore>,
    deadline: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn CredentialStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn run<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                let ms = self.deadline.as_millis() as u64;
                tracing::warn!(store = self.inner.name(), op, timeout_ms = ms, "Store call timed out");
                Err(WardenError::Timeout(ms))
            }
        }
    }
}

#[async_trait]
impl CredentialStore for TimeoutStore {
    async fn create_user(&self, user: User) -> Result<User> {
        self.run("create_user", self.inner.create_user(user)).await
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        self.run("find_user_by_id", self.inner.find_user_by_id(user_id))
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.run("find_user_by_email", self.inner.find_user_by_email(email))
            .await
    }

    async fn find_user_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        self.run("find_user_by_token", self.inner.find_user_by_token(token, now))
            .await
    }

    async fn replace_tokens(&self, user_id: &str, tokens: Vec<TokenRecord>) -> Result<bool> {
        self.run("replace_tokens", self.inner.replace_tokens(user_id, tokens))
            .await
    }

    async fn clear_tokens(&self, user_id: &str) -> Result<bool> {
        self.run("clear_tokens", self.inner.clear_tokens(user_id))
            .await
    }

    async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<Option<User>> {
        self.run("update_profile", self.inner.update_profile(user_id, update))
            .await
    }

    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        self.run(
            "update_password",
            self.inner.update_password(user_id, password_hash),
        )
        .await
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<bool> {
        self.run("mark_email_verified", self.inner.mark_email_verified(user_id))
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.run("ping", self.inner.ping()).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCredentialStore;

    /// Store whose lookups never finish
    struct StalledStore;

    #[async_trait]
    impl CredentialStore for StalledStore {
        async fn create_user(&self, user: User) -> Result<User> {
            Ok(user)
        }
        async fn find_user_by_id(&self, _user_id: &str) -> Result<Option<User>> {
            std::future::pending().await
        }
        async fn find_user_by_email(&self, _email: &str) -> Result<Option<User>> {
            std::future::pending().await
        }
        async fn find_user_by_token(&self, _token: &str, _now: DateTime<Utc>) -> Result<Option<User>> {
            std::future::pending().await
        }
        async fn replace_tokens(&self, _user_id: &str, _tokens: Vec<TokenRecord>) -> Result<bool> {
            std::future::pending().await
        }
        async fn clear_tokens(&self, _user_id: &str) -> Result<bool> {
            std::future::pending().await
        }
        async fn update_profile(&self, _user_id: &str, _update: ProfileUpdate) -> Result<Option<User>> {
            std::future::pending().await
        }
        async fn update_password(&self, _user_id: &str, _hash: &str) -> Result<bool> {
            std::future::pending().await
        }
        async fn mark_email_verified(&self, _user_id: &str) -> Result<bool> {
            std::future::pending().await
        }
        async fn ping(&self) -> Result<()> {
            std::future::pending().await
        }
        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_stalled_call_times_out() {
        let store = TimeoutStore::new(Arc::new(StalledStore), Duration::from_millis(50));

        let err = store.find_user_by_token("t", Utc::now()).await.unwrap_err();
        assert!(matches!(err, WardenError::Timeout(50)));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let store = TimeoutStore::new(
            Arc::new(MemoryCredentialStore::new()),
            Duration::from_secs(1),
        );
        assert!(store.ping().await.is_ok());
        assert_eq!(store.name(), "memory");
    }
}
