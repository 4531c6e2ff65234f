//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Every write that changes a
//! stored record takes the [`ConcurrencyToken`] the caller last read and
//! fails with [`GestorError::ConcurrencyConflict`](crate::GestorError)
//! when the stored token has moved on. Association replacements are
//! all-or-nothing.

use uuid::Uuid;

use crate::error::GestorResult;
use crate::graph::FamilyGraph;
use crate::models::{
    audit::{AuditAction, AuditLogEntry, CreateAuditLogEntry},
    family::{CreateFamily, Family, UpdateFamily},
    permission::{CreatePermission, Permission, UpdatePermission},
    user::{CreateUser, UpdateUser, User, UserAssignments},
    version::ConcurrencyToken,
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    fn create(&self, input: CreateUser) -> impl Future<Output = GestorResult<User>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GestorResult<User>> + Send;
    fn get_by_login(&self, login_name: &str) -> impl Future<Output = GestorResult<User>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateUser,
        expected: ConcurrencyToken,
    ) -> impl Future<Output = GestorResult<User>> + Send;
    fn set_password_hash(
        &self,
        id: Uuid,
        password_hash: String,
        expected: ConcurrencyToken,
    ) -> impl Future<Output = GestorResult<User>> + Send;
    /// Soft or hard delete, depending on how the repository was built.
    fn delete(
        &self,
        id: Uuid,
        expected: ConcurrencyToken,
    ) -> impl Future<Output = GestorResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = GestorResult<PaginatedResult<User>>> + Send;

    /// Direct family and permission ids of a user.
    fn get_assignments(&self, id: Uuid) -> impl Future<Output = GestorResult<UserAssignments>> + Send;

    /// Families directly assigned to a user.
    fn get_families(&self, id: Uuid) -> impl Future<Output = GestorResult<Vec<Family>>> + Send;

    /// Permissions directly assigned to a user.
    fn get_permissions(&self, id: Uuid)
    -> impl Future<Output = GestorResult<Vec<Permission>>> + Send;

    /// Assignments of every user directly assigned to any of `family_ids`.
    fn list_assignments_for_families(
        &self,
        family_ids: &[Uuid],
    ) -> impl Future<Output = GestorResult<Vec<UserAssignments>>> + Send;

    /// Replace the user's direct families. Guarded by the user's token and
    /// the graph revision the caller validated against; a successful write
    /// advances the graph revision.
    fn replace_families(
        &self,
        id: Uuid,
        family_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> impl Future<Output = GestorResult<ConcurrencyToken>> + Send;

    /// Replace the user's direct permissions. Same guards as
    /// [`UserRepository::replace_families`].
    fn replace_permissions(
        &self,
        id: Uuid,
        permission_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> impl Future<Output = GestorResult<ConcurrencyToken>> + Send;
}

// ---------------------------------------------------------------------------
// Families
// ---------------------------------------------------------------------------

pub trait FamilyRepository: Send + Sync {
    fn create(&self, input: CreateFamily) -> impl Future<Output = GestorResult<Family>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GestorResult<Family>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateFamily,
        expected: ConcurrencyToken,
    ) -> impl Future<Output = GestorResult<Family>> + Send;
    /// Remove a family and every edge touching it.
    fn delete(
        &self,
        id: Uuid,
        expected: ConcurrencyToken,
    ) -> impl Future<Output = GestorResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = GestorResult<PaginatedResult<Family>>> + Send;

    /// Load every family, permission, parent/child edge and family grant
    /// in one snapshot.
    fn load_graph(&self) -> impl Future<Output = GestorResult<FamilyGraph>> + Send;

    /// Replace both the parents and the children of a family.
    fn replace_relations(
        &self,
        id: Uuid,
        parent_ids: &[Uuid],
        child_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> impl Future<Output = GestorResult<ConcurrencyToken>> + Send;

    /// Replace the permissions granted directly to a family.
    fn replace_permissions(
        &self,
        id: Uuid,
        permission_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> impl Future<Output = GestorResult<ConcurrencyToken>> + Send;
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

pub trait PermissionRepository: Send + Sync {
    /// Fails with `DuplicatePermission` when the name is taken.
    fn create(
        &self,
        input: CreatePermission,
    ) -> impl Future<Output = GestorResult<Permission>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GestorResult<Permission>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdatePermission,
        expected: ConcurrencyToken,
    ) -> impl Future<Output = GestorResult<Permission>> + Send;
    fn delete(
        &self,
        id: Uuid,
        expected: ConcurrencyToken,
    ) -> impl Future<Output = GestorResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = GestorResult<PaginatedResult<Permission>>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only)
// ---------------------------------------------------------------------------

/// Query filters for audit log entries.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub target_id: Option<Uuid>,
}

pub trait AuditLogRepository: Send + Sync {
    /// Append a new audit log entry. No update or delete operations exist.
    fn append(
        &self,
        input: CreateAuditLogEntry,
    ) -> impl Future<Output = GestorResult<AuditLogEntry>> + Send;
    fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> impl Future<Output = GestorResult<PaginatedResult<AuditLogEntry>>> + Send;
}
