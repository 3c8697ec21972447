//! Warden Store - Credential store abstraction
//!
//! A credential store holds user documents, each embedding its ordered
//! token collection. The token lifecycle only relies on the lookups and
//! the full-collection replace defined by [`CredentialStore`]; the backends
//! decide how those map onto storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_core::{ProfileUpdate, Result, TokenRecord, User};

pub mod memory;
pub mod surrealdb_store;
pub mod timeout;

pub use memory::MemoryCredentialStore;
pub use surrealdb_store::SurrealCredentialStore;
pub use timeout::TimeoutStore;

/// Trait for credential store operations
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new account. Fails with `Conflict` if the email is taken
    /// by a non-archived account.
    async fn create_user(&self, user: User) -> Result<User>;

    /// Fetch an account by id, restricted to active accounts
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>>;

    /// Fetch an account by normalized email, excluding archived accounts
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Fetch the account holding a token whose value equals `token` and
    /// whose expiry is strictly after `now`. Both conditions must hold for
    /// the same embedded record, and are evaluated by the store itself.
    async fn find_user_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>>;

    /// Overwrite the whole token collection of an account.
    /// Returns `false` if the account does not exist.
    async fn replace_tokens(&self, user_id: &str, tokens: Vec<TokenRecord>) -> Result<bool>;

    /// Remove every token of an account, whatever its purpose
    async fn clear_tokens(&self, user_id: &str) -> Result<bool>;

    /// Apply a profile update to an active account
    async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<Option<User>>;

    /// Store a new password hash
    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<bool>;

    /// Flag the account's email as confirmed
    async fn mark_email_verified(&self, user_id: &str) -> Result<bool>;

    /// Cheap liveness round trip
    async fn ping(&self) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
