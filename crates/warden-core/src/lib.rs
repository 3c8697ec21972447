//! Warden Core - Domain models, configuration and shared types
//!
//! This crate defines the abstractions shared by the store and API crates:
//! - Account and token models (users, persisted tokens, purposes)
//! - Common error types
//! - Clock abstraction used for every expiry comparison
//! - Configuration management

pub mod config;

pub use config::{AppConfig, AuthConfig, ConfigError, DatabaseConfig, StoreBackend, TokenTtls};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Store did not respond within {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Whether the error means the backing store could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::DatabaseError(_) | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;

// ============================================================================
// Account Models
// ============================================================================

/// User role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    #[default]
    User,
    Admin,
    Expert,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "USER",
            UserRole::Admin => "ADMIN",
            UserRole::Expert => "EXPERT",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account lifecycle status
///
/// Only `Active` accounts can authenticate. `Archived` accounts are also
/// invisible to email lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Archived => "archived",
        }
    }
}

/// Reason a token was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenPurpose {
    /// Session token returned on login
    Refresh,
    /// Email ownership confirmation
    VerifyEmail,
    /// Password reset link
    ResetPassword,
}

impl TokenPurpose {
    pub const ALL: [TokenPurpose; 3] = [
        TokenPurpose::Refresh,
        TokenPurpose::VerifyEmail,
        TokenPurpose::ResetPassword,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Refresh => "REFRESH",
            TokenPurpose::VerifyEmail => "VERIFY_EMAIL",
            TokenPurpose::ResetPassword => "RESET_PASSWORD",
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TokenPurpose {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        TokenPurpose::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| WardenError::ValidationError(format!("unknown token purpose: {s}")))
    }
}

/// Persisted shadow of a signed credential
///
/// The record is embedded in its owner's user document. `expires` is kept
/// in whole Unix seconds, matching the `exp` claim of the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The signed credential string
    pub token: String,

    /// Expiry instant
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires: DateTime<Utc>,

    /// Purpose the token was issued for
    #[serde(rename = "type")]
    pub purpose: TokenPurpose,

    /// Explicit invalidation flag (never set by the shipped flows)
    #[serde(default)]
    pub blacklisted: bool,
}

impl TokenRecord {
    pub fn new(token: String, expires: DateTime<Utc>, purpose: TokenPurpose) -> Self {
        Self {
            token,
            expires,
            purpose,
            blacklisted: false,
        }
    }

    /// A token is live strictly before its expiry instant
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires
    }
}

/// User account model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Immutable identifier (UUID string)
    pub id: String,

    /// Display name
    pub name: String,

    /// Normalized email address (lower-cased, trimmed)
    pub email: String,

    /// Argon2id PHC string; never serialized outward
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub role: UserRole,

    pub status: UserStatus,

    #[serde(default)]
    pub email_verified: bool,

    /// Embedded token collection, in insertion order
    #[serde(default)]
    pub tokens: Vec<TokenRecord>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a fresh account from a signup request
    pub fn new(new_user: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: new_user.name.trim().to_string(),
            email: normalize_email(&new_user.email),
            password_hash: new_user.password_hash,
            role: new_user.role,
            status: UserStatus::Active,
            email_verified: false,
            tokens: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Whether a live record with exactly this credential value exists
    pub fn holds_live_token(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.tokens
            .iter()
            .any(|t| t.token == token && t.is_live_at(now))
    }

    /// Public representation (no password hash, no tokens)
    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            status: self.status,
            email_verified: self.email_verified,
            created_at: self.created_at,
        }
    }
}

/// Data needed to create an account; the password is already hashed
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
}

/// Profile fields a user may change on their own account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
}

/// Public user representation (safe for API responses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Canonical form used for storing and looking up email addresses
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for every expiry comparison
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock second
    pub fn starting_now() -> Self {
        let secs = Utc::now().timestamp();
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Tests
// ============================================================================
