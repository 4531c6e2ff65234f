//! Assignment service. Replaces user and family assignments while
//! keeping the family graph acyclic and every affected user with at
//! least one effective permission.
//!
//! Each call validates against one graph snapshot and hands the write to
//! the repository together with the caller's concurrency token and the
//! snapshot's graph revision, so the accept/reject decision and the
//! write succeed or fail together.

use std::collections::HashSet;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cycle;
use crate::error::{GestorError, GestorResult, IntegrityViolation};
use crate::graph::FamilyGraph;
use crate::hierarchy::FamilyHierarchy;
use crate::models::audit::{Actor, AuditAction, AuditOutcome, CreateAuditLogEntry};
use crate::models::family::Family;
use crate::models::permission::Permission;
use crate::models::user::UserAssignments;
use crate::models::version::ConcurrencyToken;
use crate::repository::{AuditLogRepository, FamilyRepository, UserRepository};
use crate::resolver;

/// Orchestrates full-replace assignment of families and permissions.
///
/// Generic over repository implementations so that the rules have no
/// dependency on the database crate.
pub struct AssignmentService<U: UserRepository, F: FamilyRepository, A: AuditLogRepository> {
    users: U,
    hierarchy: FamilyHierarchy<F>,
    audit: A,
}

impl<U: UserRepository, F: FamilyRepository, A: AuditLogRepository> AssignmentService<U, F, A> {
    pub fn new(users: U, hierarchy: FamilyHierarchy<F>, audit: A) -> Self {
        Self {
            users,
            hierarchy,
            audit,
        }
    }

    /// Make `family_ids` the user's complete set of direct families.
    ///
    /// Returns the user's new concurrency token.
    pub async fn assign_families_to_user(
        &self,
        actor: &Actor,
        user_id: Uuid,
        family_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let result = self.replace_user_families(user_id, family_ids, token).await;
        self.record(
            actor,
            AuditAction::AssignFamiliesToUser,
            user_id,
            &result,
            json!({ "family_ids": family_ids }),
        )
        .await;
        result
    }

    /// Make `permission_ids` the user's complete set of direct permissions.
    ///
    /// Returns the user's new concurrency token.
    pub async fn assign_permissions_to_user(
        &self,
        actor: &Actor,
        user_id: Uuid,
        permission_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let result = self
            .replace_user_permissions(user_id, permission_ids, token)
            .await;
        self.record(
            actor,
            AuditAction::AssignPermissionsToUser,
            user_id,
            &result,
            json!({ "permission_ids": permission_ids }),
        )
        .await;
        result
    }

    /// Make `parent_ids` and `child_ids` the family's complete set of
    /// parents and children.
    ///
    /// Returns the family's new concurrency token.
    pub async fn set_family_relations(
        &self,
        actor: &Actor,
        family_id: Uuid,
        parent_ids: &[Uuid],
        child_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let result = self
            .replace_family_relations(family_id, parent_ids, child_ids, token)
            .await;
        self.record(
            actor,
            AuditAction::SetFamilyRelations,
            family_id,
            &result,
            json!({ "parent_ids": parent_ids, "child_ids": child_ids }),
        )
        .await;
        result
    }

    /// Make `permission_ids` the family's complete set of direct
    /// permissions.
    ///
    /// Returns the family's new concurrency token.
    pub async fn assign_permissions_to_family(
        &self,
        actor: &Actor,
        family_id: Uuid,
        permission_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let result = self
            .replace_family_permissions(family_id, permission_ids, token)
            .await;
        self.record(
            actor,
            AuditAction::AssignPermissionsToFamily,
            family_id,
            &result,
            json!({ "permission_ids": permission_ids }),
        )
        .await;
        result
    }

    /// Families directly assigned to a user.
    pub async fn get_user_families(&self, user_id: Uuid) -> GestorResult<Vec<Family>> {
        self.users.get_families(user_id).await
    }

    /// Permissions directly assigned to a user.
    pub async fn get_user_permissions(&self, user_id: Uuid) -> GestorResult<Vec<Permission>> {
        self.users.get_permissions(user_id).await
    }

    // -----------------------------------------------------------------
    // Validation + write
    // -----------------------------------------------------------------

    async fn replace_user_families(
        &self,
        user_id: Uuid,
        family_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let current = self.users.get_assignments(user_id).await?;
        ensure_token("user", user_id, current.version, token)?;

        let family_ids = dedup(family_ids);
        let graph = self.hierarchy.load().await?;
        ensure_families(&graph, &family_ids)?;

        if family_ids.iter().any(|id| cycle::lies_on_cycle(&graph, *id)) {
            return Err(IntegrityViolation::CircularReference.into());
        }

        let proposed = UserAssignments {
            family_ids: family_ids.clone(),
            ..current
        };
        if resolver::resolve_user(&graph, &proposed).is_empty() {
            return Err(IntegrityViolation::NoEffectivePermissions.into());
        }

        let next = self
            .users
            .replace_families(user_id, &family_ids, token, graph.revision())
            .await?;
        info!(
            %user_id,
            families = family_ids.len(),
            version = next.value(),
            "Replaced user families"
        );
        Ok(next)
    }

    async fn replace_user_permissions(
        &self,
        user_id: Uuid,
        permission_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let current = self.users.get_assignments(user_id).await?;
        ensure_token("user", user_id, current.version, token)?;

        ensure_unique_permissions(permission_ids)?;
        let graph = self.hierarchy.load().await?;
        ensure_permissions(&graph, permission_ids)?;

        let proposed = UserAssignments {
            permission_ids: permission_ids.to_vec(),
            ..current
        };
        if resolver::resolve_user(&graph, &proposed).is_empty() {
            return Err(IntegrityViolation::NoEffectivePermissions.into());
        }

        let next = self
            .users
            .replace_permissions(user_id, permission_ids, token, graph.revision())
            .await?;
        info!(
            %user_id,
            permissions = permission_ids.len(),
            version = next.value(),
            "Replaced user permissions"
        );
        Ok(next)
    }

    async fn replace_family_relations(
        &self,
        family_id: Uuid,
        parent_ids: &[Uuid],
        child_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let graph = self.hierarchy.load().await?;
        let family = graph
            .family(family_id)
            .ok_or_else(|| GestorError::not_found("family", family_id))?;
        ensure_token("family", family_id, family.version, token)?;

        let parent_ids = dedup(parent_ids);
        let child_ids = dedup(child_ids);
        ensure_families(&graph, &parent_ids)?;
        ensure_families(&graph, &child_ids)?;

        if parent_ids.contains(&family_id) {
            return Err(IntegrityViolation::CircularReference.into());
        }
        if child_ids.contains(&family_id) || parent_ids.iter().any(|p| child_ids.contains(p)) {
            return Err(IntegrityViolation::InvalidHierarchy.into());
        }

        // Children first: with no parents the family cannot close a loop,
        // so only the parent candidates need checking.
        let staged = graph.with_relations(family_id, &[], &child_ids);
        if cycle::would_create_cycle(&staged, family_id, &parent_ids) {
            return Err(IntegrityViolation::CircularReference.into());
        }

        let proposed = graph.with_relations(family_id, &parent_ids, &child_ids);
        self.ensure_members_keep_permissions(&graph, &proposed, family_id)
            .await?;

        let next = self
            .hierarchy
            .repository()
            .replace_relations(family_id, &parent_ids, &child_ids, token, graph.revision())
            .await?;
        info!(
            %family_id,
            parents = parent_ids.len(),
            children = child_ids.len(),
            version = next.value(),
            "Replaced family relations"
        );
        Ok(next)
    }

    async fn replace_family_permissions(
        &self,
        family_id: Uuid,
        permission_ids: &[Uuid],
        token: ConcurrencyToken,
    ) -> GestorResult<ConcurrencyToken> {
        let graph = self.hierarchy.load().await?;
        let family = graph
            .family(family_id)
            .ok_or_else(|| GestorError::not_found("family", family_id))?;
        ensure_token("family", family_id, family.version, token)?;

        ensure_unique_permissions(permission_ids)?;
        ensure_permissions(&graph, permission_ids)?;

        let proposed = graph.with_family_permissions(family_id, permission_ids);
        self.ensure_members_keep_permissions(&graph, &proposed, family_id)
            .await?;

        let next = self
            .hierarchy
            .repository()
            .replace_permissions(family_id, permission_ids, token, graph.revision())
            .await?;
        info!(
            %family_id,
            permissions = permission_ids.len(),
            version = next.value(),
            "Replaced family permissions"
        );
        Ok(next)
    }

    /// Every user assigned to `family_id` or to one of its ancestors
    /// (before or after the change) must still resolve to at least one
    /// permission in `proposed`.
    async fn ensure_members_keep_permissions(
        &self,
        current: &FamilyGraph,
        proposed: &FamilyGraph,
        family_id: Uuid,
    ) -> GestorResult<()> {
        let mut affected: Vec<Uuid> = vec![family_id];
        let mut seen: HashSet<Uuid> = HashSet::from([family_id]);
        for id in current
            .ancestors(family_id)
            .into_iter()
            .chain(proposed.ancestors(family_id))
        {
            if seen.insert(id) {
                affected.push(id);
            }
        }

        let members = self.users.list_assignments_for_families(&affected).await?;
        if let Some(member) = members
            .iter()
            .find(|m| resolver::resolve_user(proposed, m).is_empty())
        {
            info!(
                %family_id,
                user_id = %member.user_id,
                "Change would leave a user without effective permissions"
            );
            return Err(IntegrityViolation::NoEffectivePermissions.into());
        }
        Ok(())
    }

    /// Best-effort audit write; a failure here never changes the outcome
    /// of the operation being recorded.
    async fn record<T>(
        &self,
        actor: &Actor,
        action: AuditAction,
        target_id: Uuid,
        result: &GestorResult<T>,
        mut metadata: serde_json::Value,
    ) {
        let outcome = match result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => {
                metadata["error"] = json!(e.to_string());
                AuditOutcome::Rejected
            }
        };

        let entry = CreateAuditLogEntry {
            actor_id: Some(actor.user_id),
            action,
            target_id,
            outcome,
            metadata: Some(metadata),
        };
        if let Err(e) = self.audit.append(entry).await {
            warn!(
                error = %e,
                action = action.as_str(),
                %target_id,
                "Failed to write audit entry"
            );
        }
    }
}

fn ensure_token(
    entity: &str,
    id: Uuid,
    stored: ConcurrencyToken,
    presented: ConcurrencyToken,
) -> GestorResult<()> {
    if stored == presented {
        Ok(())
    } else {
        Err(GestorError::conflict(entity, id))
    }
}

fn ensure_families(graph: &FamilyGraph, ids: &[Uuid]) -> GestorResult<()> {
    match ids.iter().find(|id| !graph.contains(**id)) {
        Some(missing) => Err(GestorError::not_found("family", missing)),
        None => Ok(()),
    }
}

fn ensure_permissions(graph: &FamilyGraph, ids: &[Uuid]) -> GestorResult<()> {
    match ids.iter().find(|id| graph.permission(**id).is_none()) {
        Some(missing) => Err(GestorError::not_found("permission", missing)),
        None => Ok(()),
    }
}

fn ensure_unique_permissions(ids: &[Uuid]) -> GestorResult<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    if ids.iter().all(|id| seen.insert(*id)) {
        Ok(())
    } else {
        Err(IntegrityViolation::DuplicatePermission.into())
    }
}

/// Drop repeated ids, keeping first occurrences in order.
fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
