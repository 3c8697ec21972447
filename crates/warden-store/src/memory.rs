//! In-process credential store
//!
//! Keeps user documents in a map behind an async RwLock. Used by tests and
//! by single-node development setups; nothing survives a restart.

use crate::CredentialStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use warden_core::{
    normalize_email, ProfileUpdate, Result, TokenRecord, User, UserStatus, WardenError,
};

/// Memory-backed credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, User>>,
    offline: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every call fails until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Raw document access, regardless of account status
    pub async fn snapshot(&self, user_id: &str) -> Option<User> {
        self.users.read().await.get(user_id).cloned()
    }

    /// Overwrite an account's status (admin tooling and tests)
    pub async fn set_status(&self, user_id: &str, status: UserStatus) -> bool {
        match self.users.write().await.get_mut(user_id) {
            Some(user) => {
                user.status = status;
                user.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(WardenError::DatabaseError(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    async fn with_user<T>(&self, user_id: &str, f: impl FnOnce(&mut User) -> T) -> Result<Option<T>> {
        self.check_online()?;
        let mut users = self.users.write().await;
        Ok(users.get_mut(user_id).map(|user| {
            let out = f(user);
            user.updated_at = Utc::now();
            out
        }))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_user(&self, user: User) -> Result<User> {
        self.check_online()?;
        let mut users = self.users.write().await;

        let taken = users
            .values()
            .any(|u| u.email == user.email && u.status != UserStatus::Archived);
        if taken {
            return Err(WardenError::Conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }

        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        self.check_online()?;
        Ok(self
            .users
            .read()
            .await
            .get(user_id)
            .filter(|u| u.is_active())
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.check_online()?;
        let email = normalize_email(email);
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email && u.status != UserStatus::Archived)
            .cloned())
    }

    async fn find_user_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        self.check_online()?;
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.holds_live_token(token, now))
            .cloned())
    }

    async fn replace_tokens(&self, user_id: &str, tokens: Vec<TokenRecord>) -> Result<bool> {
        Ok(self
            .with_user(user_id, |user| user.tokens = tokens)
            .await?
            .is_some())
    }

    async fn clear_tokens(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .with_user(user_id, |user| user.tokens.clear())
            .await?
            .is_some())
    }

    async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<Option<User>> {
        self.check_online()?;
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(user_id).filter(|u| u.is_active()) else {
            return Ok(None);
        };

        if let Some(name) = update.name {
            user.name = name.trim().to_string();
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let hash = password_hash.to_string();
        Ok(self
            .with_user(user_id, |user| user.password_hash = hash)
            .await?
            .is_some())
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .with_user(user_id, |user| user.email_verified = true)
            .await?
            .is_some())
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    fn name(&self) -> &str {
        "memory"
    }
}
