//! SurrealDB repository implementations.

mod audit;
mod family;
mod permission;
mod user;

pub use audit::SurrealAuditLogRepository;
pub use family::SurrealFamilyRepository;
pub use permission::SurrealPermissionRepository;
pub use user::SurrealUserRepository;

use gestor_core::models::version::ConcurrencyToken;
use surrealdb::{Connection, IndexedResults, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub(crate) total: u64,
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Migration(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_uuids(values: &[String]) -> Result<Vec<Uuid>, DbError> {
    values.iter().map(|v| parse_uuid(v)).collect()
}

pub(crate) fn id_strings(ids: &[Uuid]) -> Vec<String> {
    ids.iter().map(Uuid::to_string).collect()
}

/// Guard prelude shared by every versioned write script.
///
/// Expects `$record` to be bound by the caller's script and the
/// `$expected` / `$graph_revision` parameters to be bound on the query.
/// Leaves `$status` set to `'ok'`, `'missing'`, `'stale_graph_revision'`
/// or `'stale_version'`; the version bump only happens on `'ok'`.
pub(crate) const GRAPH_GUARD: &str = "\
LET $exists = record::exists($record); \
LET $fresh = (SELECT VALUE revision FROM graph_revision:current)[0] = $graph_revision; \
LET $updated = IF $exists AND $fresh { \
    (UPDATE $record SET version = version + 1, updated_at = time::now() \
     WHERE version = $expected RETURN AFTER) \
} ELSE { [] }; \
LET $status = IF !$exists { 'missing' } \
    ELSE IF !$fresh { 'stale_graph_revision' } \
    ELSE IF array::len($updated) = 0 { 'stale_version' } \
    ELSE { 'ok' };";

/// Same as [`GRAPH_GUARD`] without the graph revision condition.
pub(crate) const VERSION_GUARD: &str = "\
LET $exists = record::exists($record); \
LET $updated = IF $exists { \
    (UPDATE $record SET version = version + 1, updated_at = time::now() \
     WHERE version = $expected RETURN AFTER) \
} ELSE { [] }; \
LET $status = IF !$exists { 'missing' } \
    ELSE IF array::len($updated) = 0 { 'stale_version' } \
    ELSE { 'ok' };";

/// Bumps the graph revision; callers run it inside their `'ok'` branch.
pub(crate) const BUMP_GRAPH_REVISION: &str =
    "UPDATE graph_revision:current SET revision = revision + 1;";

/// Run a guarded write script. `lists` are bound as arrays of id strings
/// under their names. Returns the token the record moved to.
pub(crate) async fn run_guarded<C: Connection>(
    db: &Surreal<C>,
    entity: &str,
    script: String,
    id: Uuid,
    expected: ConcurrencyToken,
    graph_revision: u64,
    lists: &[(&'static str, &[Uuid])],
) -> Result<ConcurrencyToken, DbError> {
    let mut builder = db
        .query(script)
        .bind(("id", id.to_string()))
        .bind(("expected", expected.value()))
        .bind(("graph_revision", graph_revision));
    for (name, ids) in lists {
        builder = builder.bind((*name, id_strings(ids)));
    }

    let result = builder.await?;
    take_status(result, entity, id)?;
    Ok(expected.next())
}

/// Read the status a guarded script returns from its last statement.
pub(crate) fn take_status(result: IndexedResults, entity: &str, id: Uuid) -> Result<(), DbError> {
    let mut result = result.check().map_err(|e| DbError::from_write(e, entity))?;
    let last = result.num_statements().saturating_sub(1);
    let status: Option<String> = result.take(last)?;
    match DbError::from_status(status.as_deref().unwrap_or_default(), entity, id) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
