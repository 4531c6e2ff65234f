//! SurrealDB implementation of [`AuditLogRepository`]. Append-only.

use chrono::{DateTime, Utc};
use gestor_core::error::GestorResult;
use gestor_core::models::audit::{AuditAction, AuditLogEntry, AuditOutcome, CreateAuditLogEntry};
use gestor_core::repository::{AuditLogFilter, AuditLogRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_uuid};
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct AuditRow {
    actor_id: Option<String>,
    action: String,
    target_id: String,
    outcome: String,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AuditRowWithId {
    record_id: String,
    actor_id: Option<String>,
    action: String,
    target_id: String,
    outcome: String,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

fn parse_action(s: &str) -> Result<AuditAction, DbError> {
    match s {
        "AssignFamiliesToUser" => Ok(AuditAction::AssignFamiliesToUser),
        "AssignPermissionsToUser" => Ok(AuditAction::AssignPermissionsToUser),
        "SetFamilyRelations" => Ok(AuditAction::SetFamilyRelations),
        "AssignPermissionsToFamily" => Ok(AuditAction::AssignPermissionsToFamily),
        other => Err(DbError::Migration(format!("unknown audit action: {other}"))),
    }
}

fn parse_outcome(s: &str) -> Result<AuditOutcome, DbError> {
    match s {
        "Success" => Ok(AuditOutcome::Success),
        "Rejected" => Ok(AuditOutcome::Rejected),
        other => Err(DbError::Migration(format!("unknown audit outcome: {other}"))),
    }
}

impl AuditRow {
    fn into_entry(self, id: Uuid) -> Result<AuditLogEntry, DbError> {
        Ok(AuditLogEntry {
            id,
            actor_id: self.actor_id.as_deref().map(parse_uuid).transpose()?,
            action: parse_action(&self.action)?,
            target_id: parse_uuid(&self.target_id)?,
            outcome: parse_outcome(&self.outcome)?,
            metadata: self.metadata,
            timestamp: self.timestamp,
        })
    }
}

impl AuditRowWithId {
    fn try_into_entry(self) -> Result<AuditLogEntry, DbError> {
        let id = parse_uuid(&self.record_id)?;
        AuditRow {
            actor_id: self.actor_id,
            action: self.action,
            target_id: self.target_id,
            outcome: self.outcome,
            metadata: self.metadata,
            timestamp: self.timestamp,
        }
        .into_entry(id)
    }
}

/// SurrealDB implementation of the audit log repository.
#[derive(Clone)]
pub struct SurrealAuditLogRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditLogRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AuditLogRepository for SurrealAuditLogRepository<C> {
    async fn append(&self, input: CreateAuditLogEntry) -> GestorResult<AuditLogEntry> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let metadata = input
            .metadata
            .unwrap_or(serde_json::Value::Object(Default::default()));

        let result = self
            .db
            .query(
                "CREATE type::record('audit_log', $id) SET \
                 actor_id = $actor_id, action = $action, \
                 target_id = $target_id, outcome = $outcome, \
                 metadata = $metadata",
            )
            .bind(("id", id_str.clone()))
            .bind(("actor_id", input.actor_id.map(|a| a.to_string())))
            .bind(("action", input.action.as_str()))
            .bind(("target_id", input.target_id.to_string()))
            .bind(("outcome", input.outcome.as_str()))
            .bind(("metadata", metadata))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<AuditRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("audit_log", &id_str))?;

        Ok(row.into_entry(id)?)
    }

    async fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> GestorResult<PaginatedResult<AuditLogEntry>> {
        let mut conditions = Vec::new();
        if filter.actor_id.is_some() {
            conditions.push("actor_id = $actor_id");
        }
        if filter.action.is_some() {
            conditions.push("action = $action");
        }
        if filter.target_id.is_some() {
            conditions.push("target_id = $target_id");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT count() AS total FROM audit_log {where_clause} GROUP ALL; \
             SELECT meta::id(id) AS record_id, * FROM audit_log {where_clause} \
             ORDER BY timestamp DESC \
             LIMIT $limit START $offset;"
        );

        let mut builder = self
            .db
            .query(query)
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset));
        if let Some(actor_id) = filter.actor_id {
            builder = builder.bind(("actor_id", actor_id.to_string()));
        }
        if let Some(action) = filter.action {
            builder = builder.bind(("action", action.as_str()));
        }
        if let Some(target_id) = filter.target_id {
            builder = builder.bind(("target_id", target_id.to_string()));
        }

        let mut result = builder.await.map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let rows: Vec<AuditRowWithId> = result.take(1).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_entry())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
