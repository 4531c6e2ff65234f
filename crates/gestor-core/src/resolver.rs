//! Effective permission resolution.
//!
//! A family's effective permissions are its own grants plus those of
//! every family below it: permissions roll up from children to their
//! ancestors. A user's effective permissions are the direct grants plus
//! the effective permissions of each directly assigned family.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::{GestorError, GestorResult};
use crate::graph::FamilyGraph;
use crate::hierarchy::FamilyHierarchy;
use crate::models::effective::EffectivePermission;
use crate::models::family::Family;
use crate::models::permission::Permission;
use crate::models::user::UserAssignments;
use crate::repository::{FamilyRepository, UserRepository};

/// Computes effective permissions for users and families.
#[derive(Clone)]
pub struct EffectivePermissionResolver<U: UserRepository, F: FamilyRepository> {
    users: U,
    hierarchy: FamilyHierarchy<F>,
}

impl<U: UserRepository, F: FamilyRepository> EffectivePermissionResolver<U, F> {
    pub fn new(users: U, hierarchy: FamilyHierarchy<F>) -> Self {
        Self { users, hierarchy }
    }

    /// Effective permissions of a user. An empty result means the user
    /// currently holds nothing.
    pub async fn compute_effective(&self, user_id: Uuid) -> GestorResult<Vec<EffectivePermission>> {
        let assignments = self.users.get_assignments(user_id).await?;
        let graph = self.hierarchy.load().await?;
        Ok(resolve_user(&graph, &assignments))
    }

    /// Effective permissions of a family.
    pub async fn compute_effective_for_family(
        &self,
        family_id: Uuid,
    ) -> GestorResult<Vec<EffectivePermission>> {
        let graph = self.hierarchy.load().await?;
        if !graph.contains(family_id) {
            return Err(GestorError::not_found("family", family_id));
        }
        Ok(resolve_family(&graph, family_id))
    }
}

/// Resolve a user's effective permissions against a graph snapshot.
///
/// Every contributing origin names the user's directly assigned family
/// the permission was reached through. Assigned families are walked in
/// name order, so the result does not depend on assignment order. Ids
/// missing from the snapshot are skipped.
pub fn resolve_user(graph: &FamilyGraph, assignments: &UserAssignments) -> Vec<EffectivePermission> {
    let mut set = EffectiveSet::default();

    for permission_id in &assignments.permission_ids {
        if let Some(permission) = graph.permission(*permission_id) {
            set.add_direct(permission);
        }
    }

    for family in graph.sorted(&assignments.family_ids) {
        for (permission, _holder) in permissions_below(graph, family.id) {
            set.add_inherited(permission, family);
        }
    }

    set.into_sorted()
}

/// Resolve a family's effective permissions against a graph snapshot.
///
/// Origins name the family that holds each permission directly: the
/// family itself or one of its descendants.
pub fn resolve_family(graph: &FamilyGraph, family_id: Uuid) -> Vec<EffectivePermission> {
    let mut set = EffectiveSet::default();
    for (permission, holder) in permissions_below(graph, family_id) {
        set.add_inherited(permission, holder);
    }
    set.into_sorted()
}

/// Every permission granted to `family_id` or a family below it, paired
/// with the family that holds it. Pre-order walk, children in name order.
fn permissions_below(graph: &FamilyGraph, family_id: Uuid) -> Vec<(&Permission, &Family)> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![family_id];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(holder) = graph.family(id) else {
            continue;
        };
        for permission in graph.direct_permissions(id) {
            found.push((permission, holder));
        }
        for child in graph.sorted_children(id).into_iter().rev() {
            stack.push(child.id);
        }
    }

    found
}

/// Accumulates effective permissions keyed by permission id, keeping
/// first-seen order until the final sort.
#[derive(Default)]
struct EffectiveSet {
    index: HashMap<Uuid, usize>,
    items: Vec<EffectivePermission>,
}

impl EffectiveSet {
    fn add_direct(&mut self, permission: &Permission) {
        match self.index.get(&permission.id) {
            Some(&i) => self.items[i].mark_direct(),
            None => self.push(EffectivePermission::direct(permission.clone())),
        }
    }

    fn add_inherited(&mut self, permission: &Permission, via: &Family) {
        match self.index.get(&permission.id) {
            Some(&i) => self.items[i].add_family(via),
            None => self.push(EffectivePermission::inherited(permission.clone(), via)),
        }
    }

    fn push(&mut self, item: EffectivePermission) {
        self.index.insert(item.permission.id, self.items.len());
        self.items.push(item);
    }

    fn into_sorted(mut self) -> Vec<EffectivePermission> {
        self.items.sort_by(|a, b| {
            a.permission
                .name
                .cmp(&b.permission.name)
                .then(a.permission.id.cmp(&b.permission.id))
        });
        self.items
    }
}
