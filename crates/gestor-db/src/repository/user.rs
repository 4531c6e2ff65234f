//! SurrealDB implementation of [`UserRepository`].
//!
//! Passwords arrive already hashed (see `gestor-auth`); this layer only
//! stores the PHC string. Direct assignments are `member_of` (user to
//! family) and `holds` (user to permission) edges.

use chrono::{DateTime, Utc};
use gestor_core::error::GestorResult;
use gestor_core::models::family::Family;
use gestor_core::models::permission::Permission;
use gestor_core::models::user::{CreateUser, UpdateUser, User, UserAssignments, UserDeletion};
use gestor_core::models::version::ConcurrencyToken;
use gestor_core::repository::{PaginatedResult, Pagination, UserRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use super::family::FamilyRowWithId;
use super::permission::PermissionRowWithId;
use super::{
    BUMP_GRAPH_REVISION, CountRow, GRAPH_GUARD, VERSION_GUARD, id_strings, parse_uuid,
    parse_uuids, run_guarded, take_status,
};
use crate::error::DbError;

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct UserRow {
    display_name: String,
    login_name: String,
    password_hash: String,
    active: bool,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, id: Uuid) -> User {
        User {
            id,
            display_name: self.display_name,
            login_name: self.login_name,
            password_hash: self.password_hash,
            active: self.active,
            version: ConcurrencyToken::new(self.version),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct UserRowWithId {
    record_id: String,
    display_name: String,
    login_name: String,
    password_hash: String,
    active: bool,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRowWithId {
    fn try_into_user(self) -> Result<User, DbError> {
        Ok(User {
            id: parse_uuid(&self.record_id)?,
            display_name: self.display_name,
            login_name: self.login_name,
            password_hash: self.password_hash,
            active: self.active,
            version: ConcurrencyToken::new(self.version),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A user's version plus the far ends of its assignment edges.
#[derive(Debug, SurrealValue)]
struct AssignmentRow {
    record_id: String,
    version: u64,
    family_ids: Vec<String>,
    permission_ids: Vec<String>,
}

impl AssignmentRow {
    fn try_into_assignments(self) -> Result<UserAssignments, DbError> {
        Ok(UserAssignments {
            user_id: parse_uuid(&self.record_id)?,
            version: ConcurrencyToken::new(self.version),
            family_ids: parse_uuids(&self.family_ids)?,
            permission_ids: parse_uuids(&self.permission_ids)?,
        })
    }
}

const ASSIGNMENT_PROJECTION: &str = "\
    meta::id(id) AS record_id, version, \
    (SELECT VALUE meta::id(out) FROM member_of WHERE in = $parent.id) AS family_ids, \
    (SELECT VALUE meta::id(out) FROM holds WHERE in = $parent.id) AS permission_ids";

/// SurrealDB implementation of the User repository.
#[derive(Clone)]
pub struct SurrealUserRepository<C: Connection> {
    db: Surreal<C>,
    deletion: UserDeletion,
}

impl<C: Connection> SurrealUserRepository<C> {
    /// Repository with soft deletion.
    pub fn new(db: Surreal<C>) -> Self {
        Self {
            db,
            deletion: UserDeletion::default(),
        }
    }

    /// Choose what [`UserRepository::delete`] does.
    pub fn with_deletion(mut self, deletion: UserDeletion) -> Self {
        self.deletion = deletion;
        self
    }

    async fn ensure_exists(&self, id: Uuid) -> Result<(), DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM type::record('user', $id) GROUP ALL")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<CountRow> = result.take(0)?;
        if rows.first().map(|r| r.total).unwrap_or(0) == 0 {
            return Err(DbError::not_found("user", id));
        }
        Ok(())
    }

    /// Replace every `edge` from the user with edges to `table` records.
    ///
    /// Also bumps the graph revision, so a family write validated against
    /// the old memberships fails its guard.
    async fn replace_edges(
        &self,
        id: Uuid,
        edge: &str,
        table: &str,
        target_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> Result<ConcurrencyToken, DbError> {
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('user', $id); \
             {GRAPH_GUARD} \
             IF $status = 'ok' {{ \
                 DELETE {edge} WHERE in = $record; \
                 FOR $target_id IN $target_ids {{ \
                     LET $target = type::record('{table}', $target_id); \
                     RELATE $record->{edge}->$target; \
                 }}; \
                 {BUMP_GRAPH_REVISION} \
             }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        run_guarded(
            &self.db,
            "user",
            script,
            id,
            expected,
            graph_revision,
            &[("target_ids", target_ids)],
        )
        .await
    }
}

impl<C: Connection> UserRepository for SurrealUserRepository<C> {
    async fn create(&self, input: CreateUser) -> GestorResult<User> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('user', $id) SET \
                 display_name = $display_name, login_name = $login_name, \
                 password_hash = $password_hash, active = true, version = 1",
            )
            .bind(("id", id_str.clone()))
            .bind(("display_name", input.display_name))
            .bind(("login_name", input.login_name))
            .bind(("password_hash", input.password_hash))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_write(e, "user"))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("user", &id_str))?;

        info!(user_id = %id, login_name = %row.login_name, "Created user");
        Ok(row.into_user(id))
    }

    async fn get_by_id(&self, id: Uuid) -> GestorResult<User> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('user', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("user", &id_str))?;

        Ok(row.into_user(id))
    }

    async fn get_by_login(&self, login_name: &str) -> GestorResult<User> {
        let mut result = self
            .db
            .query("SELECT meta::id(id) AS record_id, * FROM user WHERE login_name = $login_name")
            .bind(("login_name", login_name.to_owned()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("user", login_name))?;

        Ok(row.try_into_user()?)
    }

    async fn update(
        &self,
        id: Uuid,
        input: UpdateUser,
        expected: ConcurrencyToken,
    ) -> GestorResult<User> {
        let mut sets = Vec::new();
        if input.display_name.is_some() {
            sets.push("display_name = $display_name");
        }
        if input.active.is_some() {
            sets.push("active = $active");
        }
        let apply = if sets.is_empty() {
            String::new()
        } else {
            format!("UPDATE $record SET {};", sets.join(", "))
        };

        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('user', $id); \
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
        if let Some(display_name) = input.display_name {
            builder = builder.bind(("display_name", display_name));
        }
        if let Some(active) = input.active {
            builder = builder.bind(("active", active));
        }

        let result = builder.await.map_err(DbError::from)?;
        take_status(result, "user", id)?;

        self.get_by_id(id).await
    }

    async fn set_password_hash(
        &self,
        id: Uuid,
        password_hash: String,
        expected: ConcurrencyToken,
    ) -> GestorResult<User> {
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('user', $id); \
             {VERSION_GUARD} \
             IF $status = 'ok' {{ UPDATE $record SET password_hash = $password_hash; }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        let result = self
            .db
            .query(script)
            .bind(("id", id.to_string()))
            .bind(("expected", expected.value()))
            .bind(("password_hash", password_hash))
            .await
            .map_err(DbError::from)?;
        take_status(result, "user", id)?;

        self.get_by_id(id).await
    }

    async fn delete(&self, id: Uuid, expected: ConcurrencyToken) -> GestorResult<()> {
        let apply = match self.deletion {
            UserDeletion::Soft => "UPDATE $record SET active = false;",
            UserDeletion::Hard => {
                "DELETE member_of WHERE in = $record; \
                 DELETE holds WHERE in = $record; \
                 DELETE $record; \
                 UPDATE graph_revision:current SET revision = revision + 1;"
            }
        };
        let script = format!(
            "BEGIN TRANSACTION; \
             LET $record = type::record('user', $id); \
             {VERSION_GUARD} \
             IF $status = 'ok' {{ {apply} }}; \
             COMMIT TRANSACTION; \
             RETURN $status;"
        );

        run_guarded(&self.db, "user", script, id, expected, 0, &[]).await?;
        info!(user_id = %id, deletion = ?self.deletion, "Deleted user");
        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> GestorResult<PaginatedResult<User>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM user GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM user \
                 ORDER BY login_name ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_user())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn get_assignments(&self, id: Uuid) -> GestorResult<UserAssignments> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(format!(
                "SELECT {ASSIGNMENT_PROJECTION} FROM type::record('user', $id)"
            ))
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AssignmentRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("user", &id_str))?;

        Ok(row.try_into_assignments()?)
    }

    async fn get_families(&self, id: Uuid) -> GestorResult<Vec<Family>> {
        self.ensure_exists(id).await?;

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM family \
                 WHERE id IN (\
                     SELECT VALUE out FROM member_of \
                     WHERE in = type::record('user', $id)\
                 ) \
                 ORDER BY name ASC",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<FamilyRowWithId> = result.take(0).map_err(DbError::from)?;
        let families = rows
            .into_iter()
            .map(|row| row.try_into_family())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(families)
    }

    async fn get_permissions(&self, id: Uuid) -> GestorResult<Vec<Permission>> {
        self.ensure_exists(id).await?;

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 WHERE id IN (\
                     SELECT VALUE out FROM holds \
                     WHERE in = type::record('user', $id)\
                 ) \
                 ORDER BY name ASC",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRowWithId> = result.take(0).map_err(DbError::from)?;
        let permissions = rows
            .into_iter()
            .map(|row| row.try_into_permission())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(permissions)
    }

    async fn list_assignments_for_families(
        &self,
        family_ids: &[Uuid],
    ) -> GestorResult<Vec<UserAssignments>> {
        if family_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut result = self
            .db
            .query(format!(
                "SELECT {ASSIGNMENT_PROJECTION} FROM user \
                 WHERE id IN (\
                     SELECT VALUE in FROM member_of \
                     WHERE meta::id(out) IN $family_ids\
                 )"
            ))
            .bind(("family_ids", id_strings(family_ids)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AssignmentRow> = result.take(0).map_err(DbError::from)?;
        let assignments = rows
            .into_iter()
            .map(|row| row.try_into_assignments())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(assignments)
    }

    async fn replace_families(
        &self,
        id: Uuid,
        family_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> GestorResult<ConcurrencyToken> {
        let next = self
            .replace_edges(id, "member_of", "family", family_ids, expected, graph_revision)
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
        let next = self
            .replace_edges(id, "holds", "permission", permission_ids, expected, graph_revision)
            .await?;
        Ok(next)
    }
}
