//! Cycle validation for family parent/child edits.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::{GestorError, GestorResult};
use crate::graph::FamilyGraph;
use crate::hierarchy::FamilyHierarchy;
use crate::repository::FamilyRepository;

/// Decides whether attaching parents to a family would break the
/// acyclic family hierarchy. Never writes.
#[derive(Clone)]
pub struct CycleValidator<F: FamilyRepository> {
    hierarchy: FamilyHierarchy<F>,
}

impl<F: FamilyRepository> CycleValidator<F> {
    pub fn new(hierarchy: FamilyHierarchy<F>) -> Self {
        Self { hierarchy }
    }

    /// Load the current graph and check `proposed_parent_ids` against it.
    ///
    /// Fails with `NotFound` if `family_id` does not exist.
    pub async fn would_create_cycle(
        &self,
        family_id: Uuid,
        proposed_parent_ids: &[Uuid],
    ) -> GestorResult<bool> {
        let graph = self.hierarchy.load().await?;
        if !graph.contains(family_id) {
            return Err(GestorError::not_found("family", family_id));
        }
        Ok(would_create_cycle(&graph, family_id, proposed_parent_ids))
    }
}

/// Returns `true` if making every id in `proposed_parent_ids` a parent of
/// `family_id` would create a cycle in `graph`.
///
/// A candidate is rejected when it is the family itself, when the family
/// is already reachable upward from it, or when it already sits below the
/// family. Candidates that already sit above the family are rejected as
/// well; callers re-parenting a family check against a graph where the
/// family's current parent edges have been removed.
pub fn would_create_cycle(graph: &FamilyGraph, family_id: Uuid, proposed_parent_ids: &[Uuid]) -> bool {
    if proposed_parent_ids.is_empty() {
        return false;
    }
    if proposed_parent_ids.contains(&family_id) {
        return true;
    }

    let descendants: HashSet<Uuid> = graph.descendants(family_id).into_iter().collect();
    let ancestors: HashSet<Uuid> = graph.ancestors(family_id).into_iter().collect();

    proposed_parent_ids.iter().any(|candidate| {
        descendants.contains(candidate)
            || ancestors.contains(candidate)
            || graph.ancestors(*candidate).contains(&family_id)
    })
}

/// Returns `true` if `family_id` is its own ancestor in `graph`. Only
/// possible when the stored data is already corrupt.
pub fn lies_on_cycle(graph: &FamilyGraph, family_id: Uuid) -> bool {
    graph
        .parents(family_id)
        .iter()
        .any(|p| *p == family_id || graph.ancestors(*p).contains(&family_id))
}
