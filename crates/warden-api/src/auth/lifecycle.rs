//! Token lifecycle: issue, resolve, consume, revoke
//!
//! Each user holds at most one token per purpose. Issuing a token of a
//! purpose replaces the previous one; resolving a credential requires both a
//! live store record with exactly that value and a valid signature.
//!
//! Writes to a user's token collection are full replaces computed from a
//! prior read, so every writer for a user runs under that user's lock
//! stripe. Resolution only reads and takes no lock.

use super::codec::{CodecError, TokenCodec};
use super::locks::UserLocks;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use warden_core::{Clock, TokenPurpose, TokenRecord, TokenTtls, WardenError};
use warden_store::CredentialStore;

/// Why a credential was refused. Logged, never sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    MissingHeader,
    MalformedHeader,
    NoActiveRecord,
    Blacklisted,
    InvalidSignature,
    Expired,
    MalformedCredential,
    SubjectMismatch,
    InactiveAccount,
    WrongPurpose,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::MissingHeader => "missing_header",
            FailureCause::MalformedHeader => "malformed_header",
            FailureCause::NoActiveRecord => "no_active_record",
            FailureCause::Blacklisted => "blacklisted",
            FailureCause::InvalidSignature => "invalid_signature",
            FailureCause::Expired => "expired",
            FailureCause::MalformedCredential => "malformed_credential",
            FailureCause::SubjectMismatch => "subject_mismatch",
            FailureCause::InactiveAccount => "inactive_account",
            FailureCause::WrongPurpose => "wrong_purpose",
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CodecError> for FailureCause {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidSignature => FailureCause::InvalidSignature,
            CodecError::Expired => FailureCause::Expired,
            CodecError::Malformed | CodecError::Encoding(_) => FailureCause::MalformedCredential,
        }
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("User not found")]
    UserNotFound,

    #[error("Unauthenticated ({cause})")]
    Unauthenticated { cause: FailureCause },

    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(#[source] WardenError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    pub fn unauthenticated(cause: FailureCause) -> Self {
        Self::Unauthenticated { cause }
    }
}

impl From<WardenError> for LifecycleError {
    fn from(err: WardenError) -> Self {
        if err.is_unavailable() {
            LifecycleError::StoreUnavailable(err)
        } else {
            LifecycleError::Internal(err.to_string())
        }
    }
}

impl From<CodecError> for LifecycleError {
    fn from(err: CodecError) -> Self {
        LifecycleError::Internal(err.to_string())
    }
}

/// Session artifact returned to the client on login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionToken {
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub user_id: String,
    pub purpose: TokenPurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Orchestrates minting, persisting, verifying and revoking tokens
pub struct TokenLifecycle {
    store: Arc<dyn CredentialStore>,
    codec: TokenCodec,
    ttls: TokenTtls,
    clock: Arc<dyn Clock>,
    locks: UserLocks,
}

impl TokenLifecycle {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: TokenCodec,
        ttls: TokenTtls,
        clock: Arc<dyn Clock>,
        lock_stripes: usize,
    ) -> Self {
        Self {
            store,
            codec,
            ttls,
            clock,
            locks: UserLocks::new(lock_stripes),
        }
    }

    pub fn ttls(&self) -> &TokenTtls {
        &self.ttls
    }

    /// Current instant truncated to whole seconds, the resolution of
    /// both the `exp` claim and the persisted expiry
    fn now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
    }

    /// Mint a token of `purpose` for `user_id` and make it the user's only
    /// token of that purpose
    pub async fn issue(
        &self,
        user_id: &str,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<TokenRecord, LifecycleError> {
        let _guard = self.locks.lock(user_id).await;

        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(LifecycleError::UserNotFound)?;

        let issued_at = self.now();
        let expires = issued_at.checked_add_signed(ttl).ok_or_else(|| {
            LifecycleError::Internal(format!("token lifetime {ttl} overflows the clock"))
        })?;
        let token = self.codec.mint(&user.id, issued_at, expires, purpose)?;
        let record = TokenRecord::new(token, expires, purpose);

        let mut tokens: Vec<TokenRecord> = user
            .tokens
            .into_iter()
            .filter(|t| t.purpose != purpose)
            .collect();
        tokens.push(record.clone());

        if !self.store.replace_tokens(&user.id, tokens).await? {
            return Err(LifecycleError::UserNotFound);
        }

        tracing::debug!(
            user_id = %user.id,
            purpose = %purpose,
            expires = %record.expires,
            "Token issued"
        );

        Ok(record)
    }

    async fn issue_with_configured_ttl(
        &self,
        user_id: &str,
        purpose: TokenPurpose,
    ) -> Result<TokenRecord, LifecycleError> {
        self.issue(user_id, purpose, self.ttls.for_purpose(purpose)).await
    }

    pub async fn issue_auth_session(&self, user_id: &str) -> Result<SessionToken, LifecycleError> {
        let record = self
            .issue_with_configured_ttl(user_id, TokenPurpose::Refresh)
            .await?;

        Ok(SessionToken {
            token: record.token,
            expires: record.expires,
        })
    }

    pub async fn issue_email_verification(&self, user_id: &str) -> Result<String, LifecycleError> {
        let record = self
            .issue_with_configured_ttl(user_id, TokenPurpose::VerifyEmail)
            .await?;
        Ok(record.token)
    }

    pub async fn issue_password_reset(&self, user_id: &str) -> Result<String, LifecycleError> {
        let record = self
            .issue_with_configured_ttl(user_id, TokenPurpose::ResetPassword)
            .await?;
        Ok(record.token)
    }

    /// Map a presented credential to the identity it was issued for.
    ///
    /// Read-only. The store lookup comes first so that a revoked credential
    /// is refused regardless of its signature.
    pub async fn resolve(&self, credential: &str) -> Result<ResolvedIdentity, LifecycleError> {
        use FailureCause::*;

        let now = self.now();

        let owner = self
            .store
            .find_user_by_token(credential, now)
            .await?
            .ok_or(LifecycleError::unauthenticated(NoActiveRecord))?;

        let record = owner
            .tokens
            .iter()
            .find(|t| t.token == credential)
            .ok_or(LifecycleError::unauthenticated(NoActiveRecord))?;
        if record.blacklisted {
            return Err(LifecycleError::unauthenticated(Blacklisted));
        }

        let claims = self
            .codec
            .verify_signature(credential, now)
            .map_err(|e| LifecycleError::unauthenticated(e.into()))?;

        if claims.sub != owner.id {
            return Err(LifecycleError::unauthenticated(SubjectMismatch));
        }
        if !owner.is_active() {
            return Err(LifecycleError::unauthenticated(InactiveAccount));
        }

        Ok(ResolvedIdentity {
            issued_at: claims.issued_at(),
            expires_at: claims.expires_at(),
            user_id: owner.id,
            purpose: claims.purpose,
        })
    }

    /// Resolve a credential of `purpose` and remove it, so it works once
    pub async fn consume(
        &self,
        credential: &str,
        purpose: TokenPurpose,
    ) -> Result<ResolvedIdentity, LifecycleError> {
        let identity = self.resolve(credential).await?;
        if identity.purpose != purpose {
            return Err(LifecycleError::unauthenticated(FailureCause::WrongPurpose));
        }

        let _guard = self.locks.lock(&identity.user_id).await;

        let user = self
            .store
            .find_user_by_id(&identity.user_id)
            .await?
            .ok_or(LifecycleError::unauthenticated(FailureCause::InactiveAccount))?;

        let held = user.tokens.len();
        let tokens: Vec<TokenRecord> = user
            .tokens
            .into_iter()
            .filter(|t| t.token != credential)
            .collect();

        // A concurrent consume or re-issue got here first
        if tokens.len() == held {
            return Err(LifecycleError::unauthenticated(FailureCause::NoActiveRecord));
        }

        self.store.replace_tokens(&user.id, tokens).await?;
        tracing::debug!(user_id = %user.id, purpose = %purpose, "Token consumed");

        Ok(identity)
    }

    /// Drop every token the user holds, whatever its purpose
    pub async fn revoke_all(&self, user_id: &str) -> Result<(), LifecycleError> {
        let _guard = self.locks.lock(user_id).await;

        if !self.store.clear_tokens(user_id).await? {
            return Err(LifecycleError::UserNotFound);
        }

        tracing::debug!(user_id, "All tokens revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{ManualClock, NewUser, User, UserRole, UserStatus};
    use warden_store::MemoryCredentialStore;

    struct Fixture {
        store: Arc<MemoryCredentialStore>,
        clock: Arc<ManualClock>,
        lifecycle: Arc<TokenLifecycle>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryCredentialStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let lifecycle = Arc::new(TokenLifecycle::new(
            store.clone(),
            TokenCodec::new("lifecycle-secret", "warden"),
            TokenTtls::default(),
            clock.clone(),
            8,
        ));
        Fixture {
            store,
            clock,
            lifecycle,
        }
    }

    async fn add_user(store: &MemoryCredentialStore, email: &str) -> User {
        store
            .create_user(User::new(
                NewUser {
                    name: "Test".to_string(),
                    email: email.to_string(),
                    password_hash: "hash".to_string(),
                    role: UserRole::User,
                },
                Utc::now(),
            ))
            .await
            .unwrap()
    }

    fn cause(err: LifecycleError) -> FailureCause {
        match err {
            LifecycleError::Unauthenticated { cause } => cause,
            other => panic!("expected Unauthenticated, got {other:?}"),
        }
    }

    fn tamper_signature(token: &str) -> String {
        let (head, signature) = token.rsplit_once('.').unwrap();
        let mut chars: Vec<char> = signature.chars().collect();
        chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
        format!("{head}.{}", chars.into_iter().collect::<String>())
    }

    #[tokio::test]
    async fn test_issue_keeps_one_token_per_purpose() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let ttl = Duration::minutes(10);

        f.lifecycle
            .issue(&user.id, TokenPurpose::VerifyEmail, ttl)
            .await
            .unwrap();
        f.lifecycle
            .issue(&user.id, TokenPurpose::Refresh, ttl)
            .await
            .unwrap();
        let latest = f
            .lifecycle
            .issue(&user.id, TokenPurpose::VerifyEmail, ttl)
            .await
            .unwrap();

        let stored = f.store.snapshot(&user.id).await.unwrap();
        assert_eq!(stored.tokens.len(), 2);
        let verify: Vec<_> = stored
            .tokens
            .iter()
            .filter(|t| t.purpose == TokenPurpose::VerifyEmail)
            .collect();
        assert_eq!(verify.len(), 1);
        assert_eq!(verify[0], &latest);
        assert_eq!(latest.expires, f.clock.now() + ttl);
    }

    #[tokio::test]
    async fn test_issue_requires_active_user() {
        let f = fixture();
        let err = f
            .lifecycle
            .issue("missing", TokenPurpose::Refresh, Duration::days(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UserNotFound));

        let user = add_user(&f.store, "u1@example.com").await;
        f.store.set_status(&user.id, UserStatus::Inactive).await;
        let err = f.lifecycle.issue_auth_session(&user.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::UserNotFound));
    }

    #[tokio::test]
    async fn test_overflowing_lifetime_is_an_error() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;

        let err = f
            .lifecycle
            .issue(&user.id, TokenPurpose::Refresh, Duration::days(100_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Internal(_)));
        assert!(f.store.snapshot(&user.id).await.unwrap().tokens.is_empty());
    }

    #[tokio::test]
    async fn test_configured_lifetimes_per_purpose() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let now = f.clock.now();

        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        f.lifecycle.issue_password_reset(&user.id).await.unwrap();

        let ttls = f.lifecycle.ttls();
        assert_eq!(session.expires, now + ttls.refresh);
        let stored = f.store.snapshot(&user.id).await.unwrap();
        let reset = stored
            .tokens
            .iter()
            .find(|t| t.purpose == TokenPurpose::ResetPassword)
            .unwrap();
        assert_eq!(reset.expires, now + ttls.reset_password);
    }

    #[tokio::test]
    async fn test_login_session_resolves() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;

        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        assert_eq!(session.expires, f.clock.now() + Duration::days(30));

        let identity = f.lifecycle.resolve(&session.token).await.unwrap();
        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.purpose, TokenPurpose::Refresh);
        assert_eq!(identity.issued_at, f.clock.now());
        assert_eq!(identity.expires_at, session.expires);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent_and_read_only() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        let before = f.store.snapshot(&user.id).await.unwrap().tokens;

        let first = f.lifecycle.resolve(&session.token).await.unwrap();
        let second = f.lifecycle.resolve(&session.token).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.store.snapshot(&user.id).await.unwrap().tokens, before);
    }

    #[tokio::test]
    async fn test_revoke_all_invalidates_every_purpose() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        let verify = f.lifecycle.issue_email_verification(&user.id).await.unwrap();
        let reset = f.lifecycle.issue_password_reset(&user.id).await.unwrap();

        f.lifecycle.revoke_all(&user.id).await.unwrap();

        for token in [session.token, verify, reset] {
            let err = f.lifecycle.resolve(&token).await.unwrap_err();
            assert_eq!(cause(err), FailureCause::NoActiveRecord);
        }
        assert!(matches!(
            f.lifecycle.revoke_all("missing").await,
            Err(LifecycleError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let ttl = Duration::minutes(10);
        let record = f
            .lifecycle
            .issue(&user.id, TokenPurpose::ResetPassword, ttl)
            .await
            .unwrap();

        f.clock.set(record.expires - Duration::seconds(1));
        assert!(f.lifecycle.resolve(&record.token).await.is_ok());

        f.clock.set(record.expires);
        let err = f.lifecycle.resolve(&record.token).await.unwrap_err();
        assert_eq!(cause(err), FailureCause::NoActiveRecord);
    }

    #[tokio::test]
    async fn test_relogin_supersedes_previous_session() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;

        let t1 = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        let t2 = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        assert_ne!(t1.token, t2.token);

        assert!(f.lifecycle.resolve(&t1.token).await.is_err());
        assert!(f.lifecycle.resolve(&t2.token).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_logins_leave_one_live_session() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;

        let logins = (0..16).map(|_| {
            let lifecycle = f.lifecycle.clone();
            let user_id = user.id.clone();
            tokio::spawn(async move { lifecycle.issue_auth_session(&user_id).await })
        });
        let sessions: Vec<SessionToken> = futures::future::join_all(logins)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let stored = f.store.snapshot(&user.id).await.unwrap().tokens;
        assert_eq!(stored.len(), 1);

        let mut live = 0;
        for session in &sessions {
            if f.lifecycle.resolve(&session.token).await.is_ok() {
                assert_eq!(session.token, stored[0].token);
                live += 1;
            }
        }
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn test_tampered_signature_is_refused() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        let tampered = tamper_signature(&session.token);

        let err = f.lifecycle.resolve(&tampered).await.unwrap_err();
        assert_eq!(cause(err), FailureCause::NoActiveRecord);

        // Even with a record holding the exact tampered value
        let mut tokens = f.store.snapshot(&user.id).await.unwrap().tokens;
        tokens.push(TokenRecord::new(
            tampered.clone(),
            session.expires,
            TokenPurpose::VerifyEmail,
        ));
        f.store.replace_tokens(&user.id, tokens).await.unwrap();

        let err = f.lifecycle.resolve(&tampered).await.unwrap_err();
        assert_eq!(cause(err), FailureCause::InvalidSignature);
    }

    #[tokio::test]
    async fn test_record_for_foreign_secret_is_refused() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let now = f.clock.now();
        let foreign = TokenCodec::new("other-secret", "warden")
            .mint(&user.id, now, now + Duration::hours(1), TokenPurpose::Refresh)
            .unwrap();
        f.store
            .replace_tokens(
                &user.id,
                vec![TokenRecord::new(
                    foreign.clone(),
                    now + Duration::hours(1),
                    TokenPurpose::Refresh,
                )],
            )
            .await
            .unwrap();

        let err = f.lifecycle.resolve(&foreign).await.unwrap_err();
        assert_eq!(cause(err), FailureCause::InvalidSignature);
    }

    #[tokio::test]
    async fn test_blacklisted_record_is_refused() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();

        let mut tokens = f.store.snapshot(&user.id).await.unwrap().tokens;
        tokens[0].blacklisted = true;
        f.store.replace_tokens(&user.id, tokens).await.unwrap();

        let err = f.lifecycle.resolve(&session.token).await.unwrap_err();
        assert_eq!(cause(err), FailureCause::Blacklisted);
    }

    #[tokio::test]
    async fn test_inactive_account_is_refused() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();

        f.store.set_status(&user.id, UserStatus::Inactive).await;

        let err = f.lifecycle.resolve(&session.token).await.unwrap_err();
        assert_eq!(cause(err), FailureCause::InactiveAccount);
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();
        let reset = f.lifecycle.issue_password_reset(&user.id).await.unwrap();

        let identity = f
            .lifecycle
            .consume(&reset, TokenPurpose::ResetPassword)
            .await
            .unwrap();
        assert_eq!(identity.user_id, user.id);

        let err = f
            .lifecycle
            .consume(&reset, TokenPurpose::ResetPassword)
            .await
            .unwrap_err();
        assert_eq!(cause(err), FailureCause::NoActiveRecord);

        // Other purposes are untouched
        assert!(f.lifecycle.resolve(&session.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_consume_checks_purpose() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();

        let err = f
            .lifecycle
            .consume(&session.token, TokenPurpose::ResetPassword)
            .await
            .unwrap_err();
        assert_eq!(cause(err), FailureCause::WrongPurpose);
        assert!(f.lifecycle.resolve(&session.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_outage_is_unavailable() {
        let f = fixture();
        let user = add_user(&f.store, "u1@example.com").await;
        let session = f.lifecycle.issue_auth_session(&user.id).await.unwrap();

        f.store.set_offline(true);

        assert!(matches!(
            f.lifecycle.resolve(&session.token).await,
            Err(LifecycleError::StoreUnavailable(_))
        ));
        assert!(matches!(
            f.lifecycle.issue_auth_session(&user.id).await,
            Err(LifecycleError::StoreUnavailable(_))
        ));
    }
}
