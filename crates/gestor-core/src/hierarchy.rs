//! Family hierarchy access: graph loading, traversal and the nested
//! listing shown to administrators.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::error::{GestorError, GestorResult};
use crate::graph::FamilyGraph;
use crate::models::family::Family;
use crate::models::permission::Permission;
use crate::repository::FamilyRepository;
use crate::resolver;

/// One node of the nested family listing.
///
/// A family with several parents appears once under each of them. Its
/// subtree is listed under the first appearance only; later appearances
/// are leaves with `repeated` set.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyTreeNode {
    pub family: Family,
    /// 0 for roots.
    pub depth: usize,
    pub direct_permission_count: usize,
    pub effective_permission_count: usize,
    pub has_children: bool,
    pub repeated: bool,
    pub children: Vec<FamilyTreeNode>,
}

impl FamilyTreeNode {
    /// Pre-order flat view of a forest, for indented list display.
    pub fn flatten(roots: &[FamilyTreeNode]) -> Vec<&FamilyTreeNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&FamilyTreeNode> = roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

/// Read access to the family graph through a [`FamilyRepository`].
#[derive(Clone)]
pub struct FamilyHierarchy<F: FamilyRepository> {
    families: F,
}

impl<F: FamilyRepository> FamilyHierarchy<F> {
    pub fn new(families: F) -> Self {
        Self { families }
    }

    /// The underlying repository.
    pub fn repository(&self) -> &F {
        &self.families
    }

    /// Load a fresh graph snapshot.
    pub async fn load(&self) -> GestorResult<FamilyGraph> {
        self.families.load_graph().await
    }

    /// Roots with their nested children, annotated for display.
    pub async fn get_all_with_hierarchy(&self) -> GestorResult<Vec<FamilyTreeNode>> {
        let graph = self.load().await?;
        Ok(build_tree(&graph))
    }

    /// Every family transitively above `family_id`.
    pub async fn get_ancestors(&self, family_id: Uuid) -> GestorResult<Vec<Family>> {
        let graph = self.load().await?;
        ensure_exists(&graph, family_id)?;
        Ok(collect(&graph, graph.ancestors(family_id)))
    }

    /// Every family transitively below `family_id`.
    pub async fn get_descendants(&self, family_id: Uuid) -> GestorResult<Vec<Family>> {
        let graph = self.load().await?;
        ensure_exists(&graph, family_id)?;
        Ok(collect(&graph, graph.descendants(family_id)))
    }

    /// Permissions granted straight to `family_id`, ordered by name.
    pub async fn get_direct_permissions(&self, family_id: Uuid) -> GestorResult<Vec<Permission>> {
        let graph = self.load().await?;
        ensure_exists(&graph, family_id)?;
        Ok(graph
            .direct_permissions(family_id)
            .into_iter()
            .cloned()
            .collect())
    }
}

fn ensure_exists(graph: &FamilyGraph, family_id: Uuid) -> GestorResult<()> {
    if graph.contains(family_id) {
        Ok(())
    } else {
        Err(GestorError::not_found("family", family_id))
    }
}

fn collect(graph: &FamilyGraph, ids: Vec<Uuid>) -> Vec<Family> {
    ids.into_iter()
        .filter_map(|id| graph.family(id).cloned())
        .collect()
}

/// Build the nested listing for a graph snapshot.
///
/// Every family is expanded once, so the listing has one node per root
/// plus one per parent/child edge. Families that no root reaches (only
/// possible when the stored edges form a cycle) are appended as extra
/// roots so nothing goes missing.
pub fn build_tree(graph: &FamilyGraph) -> Vec<FamilyTreeNode> {
    let mut builder = TreeBuilder {
        graph,
        effective_counts: HashMap::new(),
        expanded: HashSet::new(),
        on_path: HashSet::new(),
    };

    let mut roots: Vec<FamilyTreeNode> = graph
        .roots()
        .into_iter()
        .map(|f| builder.node(f, 0))
        .collect();

    let orphans: Vec<Uuid> = graph
        .families()
        .map(|f| f.id)
        .filter(|id| !builder.expanded.contains(id))
        .collect();
    for family in graph.sorted(&orphans) {
        if !builder.expanded.contains(&family.id) {
            roots.push(builder.node(family, 0));
        }
    }

    roots
}

struct TreeBuilder<'g> {
    graph: &'g FamilyGraph,
    effective_counts: HashMap<Uuid, usize>,
    expanded: HashSet<Uuid>,
    on_path: HashSet<Uuid>,
}

impl TreeBuilder<'_> {
    fn node(&mut self, family: &Family, depth: usize) -> FamilyTreeNode {
        let graph = self.graph;
        let first = self.expanded.insert(family.id);

        let children = if first {
            self.on_path.insert(family.id);
            let next: Vec<&Family> = graph
                .sorted_children(family.id)
                .into_iter()
                .filter(|child| !self.on_path.contains(&child.id))
                .collect();
            let children = next
                .into_iter()
                .map(|child| self.node(child, depth + 1))
                .collect();
            self.on_path.remove(&family.id);
            children
        } else {
            Vec::new()
        };

        let effective_permission_count = *self
            .effective_counts
            .entry(family.id)
            .or_insert_with(|| resolver::resolve_family(graph, family.id).len());

        FamilyTreeNode {
            family: family.clone(),
            depth,
            direct_permission_count: graph.direct_permission_ids(family.id).len(),
            effective_permission_count,
            has_children: !graph.children(family.id).is_empty(),
            repeated: !first,
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{add, grant};

    #[test]
    fn nests_children_with_depth_and_counts() {
        let mut g = FamilyGraph::new(0);
        let admin = add(&mut g, "Administradores");
        let ventas = add(&mut g, "Ventas");
        let facturacion = add(&mut g, "Facturacion");
        g.link(ventas, admin);
        g.link(facturacion, ventas);
        grant(&mut g, admin, "Usuarios");
        grant(&mut g, ventas, "Presupuestos");
        grant(&mut g, facturacion, "Facturas");

        let tree = build_tree(&g);
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert_eq!(root.family.name, "Administradores");
        assert_eq!(root.depth, 0);
        assert_eq!(root.direct_permission_count, 1);
        assert_eq!(root.effective_permission_count, 3);
        assert!(root.has_children);

        let flat = FamilyTreeNode::flatten(&tree);
        let rows: Vec<(&str, usize, usize)> = flat
            .iter()
            .map(|n| (n.family.name.as_str(), n.depth, n.effective_permission_count))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("Administradores", 0, 3),
                ("Ventas", 1, 2),
                ("Facturacion", 2, 1),
            ]
        );
        assert!(!flat[2].has_children);
    }

    #[test]
    fn shared_child_appears_under_each_parent() {
        let mut g = FamilyGraph::new(0);
        let a = add(&mut g, "A");
        let b = add(&mut g, "B");
        let shared = add(&mut g, "Compartida");
        g.link(shared, a);
        g.link(shared, b);

        let tree = build_tree(&g);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].children[0].family.id, shared);
        assert_eq!(tree[1].children[0].family.id, shared);
        assert!(!tree[0].children[0].repeated);
        assert!(tree[1].children[0].repeated);
        assert_eq!(FamilyTreeNode::flatten(&tree).len(), 4);
    }

    #[test]
    fn stacked_diamonds_list_each_subtree_once() {
        // Every family in a layer is a child of both families above it.
        const LAYERS: usize = 40;
        let mut g = FamilyGraph::new(0);
        let root = add(&mut g, "Raiz");
        let mut above = vec![root];
        for layer in 0..LAYERS {
            let current = vec![
                add(&mut g, &format!("C{layer:02}a")),
                add(&mut g, &format!("C{layer:02}b")),
            ];
            for child in &current {
                for parent in &above {
                    g.link(*child, *parent);
                }
            }
            above = current;
        }

        let tree = build_tree(&g);
        let flat = FamilyTreeNode::flatten(&tree);
        let edges = 2 + 4 * (LAYERS - 1);
        assert_eq!(flat.len(), 1 + edges);
        assert_eq!(flat.iter().filter(|n| !n.repeated).count(), g.len());
        assert!(
            flat.iter()
                .filter(|n| n.repeated)
                .all(|n| n.children.is_empty())
        );
        assert_eq!(tree[0].effective_permission_count, 0);
    }

    #[test]
    fn corrupt_cycle_is_listed_without_looping() {
        let mut g = FamilyGraph::new(0);
        let a = add(&mut g, "A");
        let b = add(&mut g, "B");
        g.link(b, a);
        g.link(a, b);

        let tree = build_tree(&g);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].family.id, a);
        assert_eq!(tree[0].children.len(), 1);
        assert!(tree[0].children[0].children.is_empty());
        assert!(tree[0].children[0].has_children);
    }
}
