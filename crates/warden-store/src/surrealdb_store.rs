//! SurrealDB implementation of the credential store
//!
//! Users live in the `user` table keyed by their UUID. Tokens are an
//! embedded array on the user document; every timestamp is stored as Unix
//! seconds so that expiry predicates are plain integer comparisons.

use crate::CredentialStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use warden_core::{
    normalize_email, DatabaseConfig, ProfileUpdate, Result, TokenRecord, User, UserRole,
    UserStatus, WardenError,
};

const TABLE: &str = "user";

/// SurrealDB credential store
pub struct SurrealCredentialStore {
    client: Surreal<Client>,
}

impl SurrealCredentialStore {
    /// Create a new SurrealDB connection
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        // The ws engine adds the scheme itself
        let url = config
            .surrealdb_url
            .strip_prefix("ws://")
            .or_else(|| config.surrealdb_url.strip_prefix("wss://"))
            .unwrap_or(&config.surrealdb_url);

        let client = Surreal::new::<Ws>(url)
            .await
            .map_err(|e| WardenError::DatabaseError(format!("SurrealDB connection failed: {e}")))?;

        client
            .signin(Root {
                username: &config.surrealdb_user,
                password: &config.surrealdb_pass,
            })
            .await
            .map_err(|e| WardenError::DatabaseError(format!("SurrealDB auth failed: {e}")))?;

        client
            .use_ns(&config.surrealdb_namespace)
            .use_db(&config.surrealdb_database)
            .await
            .map_err(|e| WardenError::DatabaseError(format!("SurrealDB namespace error: {e}")))?;

        Ok(Self { client })
    }

    /// Initialize schema (idempotent)
    pub async fn init_schema(&self) -> Result<()> {
        self.client
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
                DEFINE INDEX IF NOT EXISTS idx_user_email ON user FIELDS email;
                DEFINE INDEX IF NOT EXISTS idx_user_token ON user FIELDS tokens.*.token;
            "#,
            )
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Schema init failed: {e}")))?;

        Ok(())
    }

    async fn select_one(
        &self,
        query: &'static str,
        bindings: Vec<(&'static str, serde_json::Value)>,
    ) -> Result<Option<User>> {
        let mut request = self.client.query(query);
        for binding in bindings {
            request = request.bind(binding);
        }

        let records: Vec<UserDocument> = request
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Query failed: {e}")))?
            .take(0)
            .map_err(|e| WardenError::DatabaseError(format!("Result extraction failed: {e}")))?;

        records.into_iter().next().map(User::try_from).transpose()
    }

    async fn update(
        &self,
        user_id: &str,
        assignment: &'static str,
        value: serde_json::Value,
    ) -> Result<bool> {
        let query = format!(
            "UPDATE type::thing($table, $id) SET {assignment}, updated_at = $now RETURN AFTER"
        );

        let records: Vec<UserDocument> = self
            .client
            .query(query)
            .bind(("table", TABLE))
            .bind(("id", user_id.to_string()))
            .bind(("value", value))
            .bind(("now", Utc::now().timestamp()))
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Update failed: {e}")))?
            .take(0)
            .map_err(|e| WardenError::DatabaseError(format!("Result extraction failed: {e}")))?;

        Ok(!records.is_empty())
    }
}

/// User document as stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(skip_serializing)]
    id: Option<surrealdb::sql::Thing>,
    name: String,
    email: String,
    password_hash: String,
    role: UserRole,
    status: UserStatus,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    tokens: Vec<TokenRecord>,
    created_at: i64,
    updated_at: i64,
}

impl From<&User> for UserDocument {
    fn from(user: &User) -> Self {
        Self {
            id: None,
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role,
            status: user.status,
            email_verified: user.email_verified,
            tokens: user.tokens.clone(),
            created_at: user.created_at.timestamp(),
            updated_at: user.updated_at.timestamp(),
        }
    }
}

impl TryFrom<UserDocument> for User {
    type Error = WardenError;

    fn try_from(doc: UserDocument) -> Result<Self> {
        let id = doc
            .id
            .map(|thing| thing.id.to_raw())
            .ok_or_else(|| WardenError::DatabaseError("user document without id".to_string()))?;

        Ok(User {
            id,
            name: doc.name,
            email: doc.email,
            password_hash: doc.password_hash,
            role: doc.role,
            status: doc.status,
            email_verified: doc.email_verified,
            tokens: doc.tokens,
            created_at: from_unix(doc.created_at),
            updated_at: from_unix(doc.updated_at),
        })
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| WardenError::Other(e.into()))
}

#[async_trait]
impl CredentialStore for SurrealCredentialStore {
    async fn create_user(&self, user: User) -> Result<User> {
        if self.find_user_by_email(&user.email).await?.is_some() {
            return Err(WardenError::Conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }

        let content = to_json(&UserDocument::from(&user))?;
        let created: Vec<UserDocument> = self
            .client
            .query("CREATE type::thing($table, $id) CONTENT $content")
            .bind(("table", TABLE))
            .bind(("id", user.id.clone()))
            .bind(("content", content))
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Failed to create user: {e}")))?
            .take(0)
            .map_err(|e| WardenError::DatabaseError(format!("Result extraction failed: {e}")))?;

        created
            .into_iter()
            .next()
            .map(User::try_from)
            .transpose()?
            .ok_or_else(|| WardenError::DatabaseError("Failed to create user".to_string()))
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        self.select_one(
            "SELECT * FROM type::thing($table, $id) WHERE status = 'active'",
            vec![("table", TABLE.into()), ("id", user_id.into())],
        )
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.select_one(
            "SELECT * FROM type::table($table) WHERE email = $email AND status != 'archived' LIMIT 1",
            vec![("table", TABLE.into()), ("email", normalize_email(email).into())],
        )
        .await
    }

    async fn find_user_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        // Both predicates bind to the same array element
        self.select_one(
            "SELECT * FROM type::table($table) \
             WHERE array::len(tokens[WHERE token = $token AND expires > $now]) > 0 LIMIT 1",
            vec![
                ("table", TABLE.into()),
                ("token", token.into()),
                ("now", now.timestamp().into()),
            ],
        )
        .await
    }

    async fn replace_tokens(&self, user_id: &str, tokens: Vec<TokenRecord>) -> Result<bool> {
        self.update(user_id, "tokens = $value", to_json(&tokens)?)
            .await
    }

    async fn clear_tokens(&self, user_id: &str) -> Result<bool> {
        self.update(user_id, "tokens = $value", serde_json::json!([]))
            .await
    }

    async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<Option<User>> {
        if let Some(name) = update.name {
            let query = "UPDATE type::thing($table, $id) SET name = $name, updated_at = $now \
                         WHERE status = 'active' RETURN AFTER";
            self.client
                .query(query)
                .bind(("table", TABLE))
                .bind(("id", user_id.to_string()))
                .bind(("name", name.trim().to_string()))
                .bind(("now", Utc::now().timestamp()))
                .await
                .map_err(|e| WardenError::DatabaseError(format!("Update failed: {e}")))?;
        }

        self.find_user_by_id(user_id).await
    }

    async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        self.update(user_id, "password_hash = $value", password_hash.into())
            .await
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<bool> {
        self.update(user_id, "email_verified = $value", true.into())
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .health()
            .await
            .map_err(|e| WardenError::DatabaseError(format!("SurrealDB health check failed: {e}")))
    }

    fn name(&self) -> &str {
        "surrealdb"
    }
}
