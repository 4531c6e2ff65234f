//! Schema definitions and migration runner for SurrealDB.
//!
//! All tables are SCHEMAFULL. UUIDs are stored as record keys and, where
//! a foreign id is kept outside an edge, as strings. Assignments and the
//! family hierarchy are stored as relation edges.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        name: "seed_graph_revision",
        sql: SEED_GRAPH_REVISION,
    },
];

// -----------------------------------------------------------------------
// Schema v1: initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Users
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD display_name ON TABLE user TYPE string;
DEFINE FIELD login_name ON TABLE user TYPE string;
DEFINE FIELD password_hash ON TABLE user TYPE string;
DEFINE FIELD active ON TABLE user TYPE bool DEFAULT true;
DEFINE FIELD version ON TABLE user TYPE int DEFAULT 1;
DEFINE FIELD created_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_login_name ON TABLE user \
    COLUMNS login_name UNIQUE;

-- =======================================================================
-- Families
-- =======================================================================
DEFINE TABLE family SCHEMAFULL;
DEFINE FIELD name ON TABLE family TYPE string;
DEFINE FIELD description ON TABLE family TYPE option<string>;
DEFINE FIELD version ON TABLE family TYPE int DEFAULT 1;
DEFINE FIELD created_at ON TABLE family TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE family TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_family_name ON TABLE family COLUMNS name UNIQUE;

-- =======================================================================
-- Permissions
-- =======================================================================
DEFINE TABLE permission SCHEMAFULL;
DEFINE FIELD name ON TABLE permission TYPE string;
DEFINE FIELD form_id ON TABLE permission TYPE string;
DEFINE FIELD version ON TABLE permission TYPE int DEFAULT 1;
DEFINE FIELD created_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_permission_name ON TABLE permission \
    COLUMNS name UNIQUE;

-- =======================================================================
-- Graph revision (single record, bumped by every family graph write)
-- =======================================================================
DEFINE TABLE graph_revision SCHEMAFULL;
DEFINE FIELD revision ON TABLE graph_revision TYPE int DEFAULT 0;

-- =======================================================================
-- Audit Log (append-only)
-- =======================================================================
DEFINE TABLE audit_log SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD actor_id ON TABLE audit_log TYPE option<string>;
DEFINE FIELD action ON TABLE audit_log TYPE string \
    ASSERT $value IN ['AssignFamiliesToUser', 'AssignPermissionsToUser', \
    'SetFamilyRelations', 'AssignPermissionsToFamily'];
DEFINE FIELD target_id ON TABLE audit_log TYPE string;
DEFINE FIELD outcome ON TABLE audit_log TYPE string \
    ASSERT $value IN ['Success', 'Rejected'];
DEFINE FIELD metadata ON TABLE audit_log TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD timestamp ON TABLE audit_log TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_log_target ON TABLE audit_log COLUMNS target_id;
DEFINE INDEX idx_audit_log_actor ON TABLE audit_log COLUMNS actor_id;

-- =======================================================================
-- Relation (edge) tables
-- =======================================================================

-- User -> Family direct assignment
DEFINE TABLE member_of TYPE RELATION FROM user TO family SCHEMAFULL;
DEFINE INDEX idx_member_of_pair ON TABLE member_of COLUMNS in, out UNIQUE;

-- User -> Permission direct assignment
DEFINE TABLE holds TYPE RELATION FROM user TO permission SCHEMAFULL;
DEFINE INDEX idx_holds_pair ON TABLE holds COLUMNS in, out UNIQUE;

-- Family (child) -> Family (parent)
DEFINE TABLE child_of TYPE RELATION FROM family TO family SCHEMAFULL;
DEFINE INDEX idx_child_of_pair ON TABLE child_of COLUMNS in, out UNIQUE;

-- Family -> Permission grant
DEFINE TABLE grants TYPE RELATION FROM family TO permission SCHEMAFULL;
DEFINE INDEX idx_grants_pair ON TABLE grants COLUMNS in, out UNIQUE;
";

const SEED_GRAPH_REVISION: &str = "\
CREATE graph_revision:current SET revision = 0;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            db.query(
                "CREATE _migration SET version = $version, \
                 name = $name",
            )
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

            info!(version = migration.version, "Migration applied");
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
