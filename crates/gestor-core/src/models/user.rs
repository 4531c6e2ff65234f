//! User (Usuario) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::version::ConcurrencyToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    /// Unique login name.
    pub login_name: String,
    /// Argon2id PHC string; the salt is part of the encoding.
    pub password_hash: String,
    pub active: bool,
    pub version: ConcurrencyToken,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub display_name: String,
    pub login_name: String,
    /// Already-hashed password (see `gestor-auth`).
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateUser {
    pub display_name: Option<String>,
    pub active: Option<bool>,
}

/// What removing a user does to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UserDeletion {
    /// Clear the active flag and keep assignments.
    #[default]
    Soft,
    /// Remove the record together with its membership and grant edges.
    Hard,
}

/// A user's direct assignments, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAssignments {
    pub user_id: Uuid,
    pub version: ConcurrencyToken,
    pub family_ids: Vec<Uuid>,
    pub permission_ids: Vec<Uuid>,
}
