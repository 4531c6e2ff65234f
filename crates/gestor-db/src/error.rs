//! Database-specific error types and conversions.

use gestor_core::error::{GestorError, IntegrityViolation};

/// Status returned by guarded write scripts when the caller's token is stale.
pub(crate) const STALE_VERSION: &str = "stale_version";
/// Status returned by guarded write scripts when the graph moved on.
pub(crate) const STALE_GRAPH_REVISION: &str = "stale_graph_revision";
/// Status returned by guarded write scripts when the record is gone.
pub(crate) const MISSING: &str = "missing";
/// Text SurrealDB uses when a write collides with a unique index.
const UNIQUE_VIOLATION: &str = "already contains";

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Stale write on {entity} {id}")]
    Conflict { entity: String, id: String },

    #[error("Unique constraint violated on {entity}")]
    Duplicate { entity: String },
}

impl DbError {
    pub(crate) fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Classify a failed write. Unique index collisions become
    /// `Duplicate` on `entity`.
    pub(crate) fn from_write(err: surrealdb::Error, entity: &str) -> Self {
        if is_unique_violation(&err.to_string()) {
            Self::Duplicate {
                entity: entity.into(),
            }
        } else {
            Self::Surreal(err)
        }
    }

    /// Map the status string of a guarded write script to an error.
    ///
    /// `None` means the write was applied.
    pub(crate) fn from_status(status: &str, entity: &str, id: impl ToString) -> Option<Self> {
        match status {
            "ok" => None,
            MISSING => Some(Self::not_found(entity, id)),
            STALE_VERSION | STALE_GRAPH_REVISION => Some(Self::Conflict {
                entity: entity.into(),
                id: id.to_string(),
            }),
            other => Some(Self::Migration(format!("unexpected write status: {other}"))),
        }
    }
}

fn is_unique_violation(message: &str) -> bool {
    message.contains(UNIQUE_VIOLATION)
}

impl From<DbError> for GestorError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => GestorError::NotFound { entity, id },
            DbError::Conflict { entity, id } => GestorError::ConcurrencyConflict { entity, id },
            DbError::Duplicate { entity } if entity == "permission" => {
                GestorError::Integrity(IntegrityViolation::DuplicatePermission)
            }
            DbError::Duplicate { entity } => GestorError::AlreadyExists { entity },
            other => GestorError::Database(other.to_string()),
        }
    }
}
