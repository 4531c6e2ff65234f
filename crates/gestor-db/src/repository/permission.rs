//! SurrealDB implementation of [`PermissionRepository`].

use chrono::{DateTime, Utc};
use gestor_core::error::GestorResult;
use gestor_core::models::permission::{CreatePermission, Permission, UpdatePermission};
use gestor_core::models::version::ConcurrencyToken;
use gestor_core::repository::{PaginatedResult, Pagination, PermissionRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use super::{BUMP_GRAPH_REVISION, CountRow, VERSION_GUARD, parse_uuid, run_guarded, take_status};
use crate::error::DbError;

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct PermissionRow {
    name: String,
    form_id: String,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRow {
    fn into_permission(self, id: Uuid) -> Permission {
        Permission {
            id,
            name: self.name,
            form_id: self.form_id,
            version: ConcurrencyToken::new(self.version),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
pub(super) struct PermissionRowWithId {
    record_id: String,
    name: String,
    form_id: String,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRowWithId {
    pub(super) fn try_into_permission(self) -> Result<Permission, DbError> {
        Ok(Permission {
            id: parse_uuid(&self.record_id)?,
            name: self.name,
            form_id: self.form_id,
            version: ConcurrencyToken::new(self.version),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Permission repository.
#[derive(Clone)]
pub struct SurrealPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn name_taken(&self, name: &str, except: Uuid) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM permission \
                 WHERE name = $name AND meta::id(id) != $except GROUP ALL",
            )
            .bind(("name", name.to_owned()))
            .bind(("except", except.to_string()))
            .await?;
        let rows: Vec<CountRow> = result.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }
}

impl<C: Connection> PermissionRepository for SurrealPermissionRepository<C> {
    async fn create(&self, input: CreatePermission) -> GestorResult<Permission> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('permission', $id) SET \
                 name = $name, form_id = $form_id, version = 1",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("form_id", input.form_id))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_write(e, "permission"))?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("permission", &id_str))?;

        info!(permission_id = %id, name = %row.name, "Created permission");
        Ok(row.into_permission(id))
    }

    async fn get_by_id(&self, id: Uuid) -> GestorResult<Permission> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('permission', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("permission", &id_str))?;

        Ok(row.into_permission(id))
    }

    async fn update(
        &self,
        id: Uuid,
        input: UpdatePermission,
        expected: ConcurrencyToken,
    ) -> GestorResult<Permission> {
        if let Some(name) = &input.name
            && self.name_taken(name, id).await?
        {
            return Err(DbError::Duplicate {
                entity: "permission".into(),
            }
            .into());
        }

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.form_id.is_some() {
            sets.push("form_id = $form_id");
        }
        let apply = if sets.is_empty() {
            String::new()
        } else {
            format!("UPDATE $record SET {};", sets.join(", "))
        };

        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('permission', $id); \
             {VERSION_GUARD} \
             IF $status = 'ok' {{ {apply} }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        let mut builder = self
            .db
            .query(script)
            .bind(("id", id.to_string()))
            .bind(("expected", expected.value()));
        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(form_id) = input.form_id {
            builder = builder.bind(("form_id", form_id));
        }

        let result = builder.await.map_err(DbError::from)?;
        take_status(result, "permission", id)?;

        self.get_by_id(id).await
    }

    /// Removes the permission together with every user and family grant
    /// of it. Not guarded by the effective-permission rule.
    async fn delete(&self, id: Uuid, expected: ConcurrencyToken) -> GestorResult<()> {
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('permission', $id); \
             {VERSION_GUARD} \
             IF $status = 'ok' {{ \
                 DELETE grants WHERE out = $record; \
                 DELETE holds WHERE out = $record; \
                 DELETE $record; \
                 {BUMP_GRAPH_REVISION} \
             }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        run_guarded(&self.db, "permission", script, id, expected, 0, &[]).await?;
        info!(permission_id = %id, "Deleted permission");
        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> GestorResult<PaginatedResult<Permission>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM permission GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 ORDER BY name ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_permission())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
