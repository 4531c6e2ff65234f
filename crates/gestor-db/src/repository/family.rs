//! SurrealDB implementation of [`FamilyRepository`].

use chrono::{DateTime, Utc};
use gestor_core::error::GestorResult;
use gestor_core::graph::FamilyGraph;
use gestor_core::models::family::{CreateFamily, Family, UpdateFamily};
use gestor_core::models::permission::Permission;
use gestor_core::models::version::ConcurrencyToken;
use gestor_core::repository::{FamilyRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{info, warn};
use uuid::Uuid;

use super::permission::PermissionRowWithId;
use super::{
    BUMP_GRAPH_REVISION, CountRow, GRAPH_GUARD, VERSION_GUARD, parse_uuid, run_guarded,
    take_status,
};
use crate::error::DbError;

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct FamilyRow {
    name: String,
    description: Option<String>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FamilyRow {
    fn into_family(self, id: Uuid) -> Family {
        Family {
            id,
            name: self.name,
            description: self.description,
            version: ConcurrencyToken::new(self.version),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
pub(super) struct FamilyRowWithId {
    record_id: String,
    name: String,
    description: Option<String>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FamilyRowWithId {
    pub(super) fn try_into_family(self) -> Result<Family, DbError> {
        Ok(Family {
            id: parse_uuid(&self.record_id)?,
            name: self.name,
            description: self.description,
            version: ConcurrencyToken::new(self.version),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct RevisionRow {
    revision: u64,
}

#[derive(Debug, SurrealValue)]
struct ChildOfRow {
    child: String,
    parent: String,
}

#[derive(Debug, SurrealValue)]
struct GrantRow {
    family: String,
    permission: String,
}

/// SurrealDB implementation of the Family repository.
#[derive(Clone)]
pub struct SurrealFamilyRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealFamilyRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn name_taken(&self, name: &str, except: Uuid) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM family \
                 WHERE name = $name AND meta::id(id) != $except GROUP ALL",
            )
            .bind(("name", name.to_owned()))
            .bind(("except", except.to_string()))
            .await?;
        let rows: Vec<CountRow> = result.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }
}

impl<C: Connection> FamilyRepository for SurrealFamilyRepository<C> {
    async fn create(&self, input: CreateFamily) -> GestorResult<Family> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('family', $id) SET \
                 name = $name, description = $description, version = 1",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("description", input.description))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_write(e, "family"))?;

        let rows: Vec<FamilyRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("family", &id_str))?;

        info!(family_id = %id, name = %row.name, "Created family");
        Ok(row.into_family(id))
    }

    async fn get_by_id(&self, id: Uuid) -> GestorResult<Family> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('family', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<FamilyRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("family", &id_str))?;

        Ok(row.into_family(id))
    }

    async fn update(
        &self,
        id: Uuid,
        input: UpdateFamily,
        expected: ConcurrencyToken,
    ) -> GestorResult<Family> {
        if let Some(name) = &input.name
            && self.name_taken(name, id).await?
        {
            return Err(DbError::Duplicate {
                entity: "family".into(),
            }
            .into());
        }

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        match &input.description {
            Some(Some(_)) => sets.push("description = $description"),
            Some(None) => sets.push("description = NONE"),
            None => {}
        }

        let apply = if sets.is_empty() {
            String::new()
        } else {
            format!("UPDATE $record SET {};", sets.join(", "))
        };
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('family', $id); \
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
        if let Some(Some(description)) = input.description {
            builder = builder.bind(("description", description));
        }

        let result = builder.await.map_err(DbError::from)?;
        take_status(result, "family", id)?;

        self.get_by_id(id).await
    }

    async fn delete(&self, id: Uuid, expected: ConcurrencyToken) -> GestorResult<()> {
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('family', $id); \
             {VERSION_GUARD} \
             IF $status = 'ok' {{ \
                 DELETE child_of WHERE in = $record OR out = $record; \
                 DELETE grants WHERE in = $record; \
                 DELETE member_of WHERE out = $record; \
                 DELETE $record; \
                 {BUMP_GRAPH_REVISION} \
             }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        run_guarded(&self.db, "family", script, id, expected, 0, &[]).await?;
        info!(family_id = %id, "Deleted family");
        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> GestorResult<PaginatedResult<Family>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM family GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM family \
                 ORDER BY name ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<FamilyRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_family())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn load_graph(&self) -> GestorResult<FamilyGraph> {
        let mut result = self
            .db
            .query(
                "SELECT revision FROM graph_revision:current; \
                 SELECT meta::id(id) AS record_id, * FROM family; \
                 SELECT meta::id(id) AS record_id, * FROM permission; \
                 SELECT meta::id(in) AS child, meta::id(out) AS parent FROM child_of; \
                 SELECT meta::id(in) AS family, meta::id(out) AS permission FROM grants;",
            )
            .await
            .map_err(DbError::from)?;

        let revisions: Vec<RevisionRow> = result.take(0).map_err(DbError::from)?;
        let families: Vec<FamilyRowWithId> = result.take(1).map_err(DbError::from)?;
        let permissions: Vec<PermissionRowWithId> = result.take(2).map_err(DbError::from)?;
        let edges: Vec<ChildOfRow> = result.take(3).map_err(DbError::from)?;
        let grants: Vec<GrantRow> = result.take(4).map_err(DbError::from)?;

        let revision = revisions.first().map(|r| r.revision).unwrap_or(0);
        let mut graph = FamilyGraph::new(revision);

        for row in families {
            graph.insert_family(row.try_into_family()?);
        }
        for row in permissions {
            let permission: Permission = row.try_into_permission()?;
            graph.insert_permission(permission);
        }
        for edge in edges {
            let child = parse_uuid(&edge.child)?;
            let parent = parse_uuid(&edge.parent)?;
            if !graph.link(child, parent) {
                warn!(%child, %parent, "Dropping family edge to an unknown family");
            }
        }
        for grant in grants {
            let family = parse_uuid(&grant.family)?;
            let permission = parse_uuid(&grant.permission)?;
            if !graph.grant(family, permission) {
                warn!(%family, %permission, "Dropping grant with an unknown end");
            }
        }

        Ok(graph)
    }

    async fn replace_relations(
        &self,
        id: Uuid,
        parent_ids: &[Uuid],
        child_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> GestorResult<ConcurrencyToken> {
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('family', $id); \
             {GRAPH_GUARD} \
             IF $status = 'ok' {{ \
                 DELETE child_of WHERE in = $record OR out = $record; \
                 FOR $parent_id IN $parent_ids {{ \
                     LET $parent = type::record('family', $parent_id); \
                     RELATE $record->child_of->$parent; \
                 }}; \
                 FOR $child_id IN $child_ids {{ \
                     LET $child = type::record('family', $child_id); \
                     RELATE $child->child_of->$record; \
                 }}; \
                 {BUMP_GRAPH_REVISION} \
             }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        let next = run_guarded(
            &self.db,
            "family",
            script,
            id,
            expected,
            graph_revision,
            &[("parent_ids", parent_ids), ("child_ids", child_ids)],
        )
        .await?;
        Ok(next)
    }

    async fn replace_permissions(
        &self,
        id: Uuid,
        permission_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> GestorResult<ConcurrencyToken> {
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('family', $id); \
             {GRAPH_GUARD} \
             IF $status = 'ok' {{ \
                 DELETE grants WHERE in = $record; \
                 FOR $permission_id IN $permission_ids {{ \
                     LET $permission = type::record('permission', $permission_id); \
                     RELATE $record->grants->$permission; \
                 }}; \
                 {BUMP_GRAPH_REVISION} \
             }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        let next = run_guarded(
            &self.db,
            "family",
            script,
            id,
            expected,
            graph_revision,
            &[("permission_ids", permission_ids)],
        )
        .await?;
        Ok(next)
    }
}
