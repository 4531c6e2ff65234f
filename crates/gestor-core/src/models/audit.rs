//! Audit trail for assignment operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated caller of an assignment operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub login_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    AssignFamiliesToUser,
    AssignPermissionsToUser,
    SetFamilyRelations,
    AssignPermissionsToFamily,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssignFamiliesToUser => "AssignFamiliesToUser",
            Self::AssignPermissionsToUser => "AssignPermissionsToUser",
            Self::SetFamilyRelations => "SetFamilyRelations",
            Self::AssignPermissionsToFamily => "AssignPermissionsToFamily",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Rejected,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Rejected => "Rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub target_id: Uuid,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuditLogEntry {
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub target_id: Uuid,
    pub outcome: AuditOutcome,
    pub metadata: Option<serde_json::Value>,
}
