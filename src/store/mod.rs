pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

pub use self::memory::MemoryUserStore;
pub use self::redis::RedisUserStore;

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    #[schema(example = "John Doe")]
    pub name: String,
    #[schema(example = "john@example.com")]
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a user that does not exist yet. Empty strings fail validation.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Failure kinds surfaced at the store boundary. The error classifier
/// switches on these instead of inspecting backend errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key on field `{field}`")]
    Duplicate { field: &'static str },

    #[error("validation failed: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("cast to UUID failed for value {value:?} at path `{path}`")]
    InvalidId { path: &'static str, value: String },

    #[error("no document found for id {0}")]
    Missing(Uuid),

    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Collection interface ────────────────────────────────────────

/// The `users` collection. Implementations must enforce email uniqueness
/// atomically: of two concurrent `create`s with one email, exactly one wins.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users, newest `created_at` first.
    async fn find_all(&self) -> Result<Vec<User>, StoreError>;

    /// `Err(InvalidId)` when `id` is not a UUID.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn create(&self, fields: NewUser) -> Result<User, StoreError>;

    /// Persists `user`, bumping `updated_at`. `Err(Missing)` if it was deleted.
    async fn save(&self, user: User) -> Result<User, StoreError>;

    async fn delete_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Rebuilds secondary indexes from primary records.
    async fn sync_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Releases backend resources. Called once on shutdown.
    async fn close(&self) {}

    fn backend(&self) -> &'static str;
}

// ─── Shared helpers ──────────────────────────────────────────────

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::InvalidId {
        path: "id",
        value: raw.to_owned(),
    })
}

/// Trims both fields and checks they are present.
pub(crate) fn normalize(name: &str, email: &str) -> Result<(String, String), StoreError> {
    let name = name.trim().to_owned();
    let email = email.trim().to_owned();

    let mut violations = Vec::new();
    if name.is_empty() {
        violations.push(FieldViolation::new("name", "Name is required"));
    }
    if email.is_empty() {
        violations.push(FieldViolation::new("email", "Email is required"));
    }

    if violations.is_empty() {
        Ok((name, email))
    } else {
        Err(StoreError::Validation(violations))
    }
}
