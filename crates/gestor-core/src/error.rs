//! Error types for the permission engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business-rule breaches detected before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum IntegrityViolation {
    #[error("circular reference in family hierarchy")]
    CircularReference,

    #[error("user would be left without effective permissions")]
    NoEffectivePermissions,

    #[error("invalid family hierarchy")]
    InvalidHierarchy,

    #[error("duplicate permission")]
    DuplicatePermission,
}

impl IntegrityViolation {
    /// Message suitable for showing to an administrator.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CircularReference => {
                "The selected families would make a family contain itself. \
                 Remove the family from its own ancestors or descendants."
            }
            Self::NoEffectivePermissions => {
                "Every user needs at least one permission, either assigned \
                 directly or through a family."
            }
            Self::InvalidHierarchy => {
                "A family cannot be both parent and child of the same family."
            }
            Self::DuplicatePermission => "The same permission was given more than once.",
        }
    }
}

#[derive(Debug, Error)]
pub enum GestorError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Concurrency conflict on {entity} {id}: record changed since it was read")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Integrity violation: {0}")]
    Integrity(IntegrityViolation),

    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GestorError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &str, id: impl ToString) -> Self {
        Self::ConcurrencyConflict {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// The integrity violation carried by this error, if any.
    pub fn integrity(&self) -> Option<IntegrityViolation> {
        match self {
            Self::Integrity(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<IntegrityViolation> for GestorError {
    fn from(v: IntegrityViolation) -> Self {
        Self::Integrity(v)
    }
}

pub type GestorResult<T> = Result<T, GestorError>;
