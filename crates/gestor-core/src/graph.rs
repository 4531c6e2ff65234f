//! In-memory family graph.
//!
//! Families live in an arena keyed by id; parent/child edges and family
//! grants are adjacency lists of ids. Edges always point at nodes that
//! exist in the arena, so traversals never chase dangling references.
//! Every traversal keeps a visited set and therefore terminates even if
//! the stored data contains a cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::models::family::Family;
use crate::models::permission::Permission;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone)]
struct FamilyNode {
    family: Family,
    parents: Vec<Uuid>,
    children: Vec<Uuid>,
    permissions: Vec<Uuid>,
}

impl FamilyNode {
    fn new(family: Family) -> Self {
        Self {
            family,
            parents: Vec::new(),
            children: Vec::new(),
            permissions: Vec::new(),
        }
    }

    fn neighbours(&self, direction: Direction) -> &[Uuid] {
        match direction {
            Direction::Up => &self.parents,
            Direction::Down => &self.children,
        }
    }
}

/// Snapshot of every family, permission, parent/child edge and family
/// grant, tagged with the store's graph revision at load time.
#[derive(Debug, Clone, Default)]
pub struct FamilyGraph {
    revision: u64,
    nodes: HashMap<Uuid, FamilyNode>,
    permissions: HashMap<Uuid, Permission>,
}

impl FamilyGraph {
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            ..Default::default()
        }
    }

    /// Graph revision this snapshot was loaded at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Add a family, or refresh its data while keeping its edges.
    pub fn insert_family(&mut self, family: Family) {
        match self.nodes.get_mut(&family.id) {
            Some(node) => node.family = family,
            None => {
                self.nodes.insert(family.id, FamilyNode::new(family));
            }
        }
    }

    pub fn insert_permission(&mut self, permission: Permission) {
        self.permissions.insert(permission.id, permission);
    }

    /// Record `child` as a child of `parent`.
    ///
    /// Returns `false` (and changes nothing) when either end is unknown.
    pub fn link(&mut self, child: Uuid, parent: Uuid) -> bool {
        if !self.nodes.contains_key(&child) || !self.nodes.contains_key(&parent) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(&parent)
            && !node.children.contains(&child)
        {
            node.children.push(child);
        }
        if let Some(node) = self.nodes.get_mut(&child)
            && !node.parents.contains(&parent)
        {
            node.parents.push(parent);
        }
        true
    }

    /// Grant `permission` directly to `family`.
    ///
    /// Returns `false` (and changes nothing) when either end is unknown.
    pub fn grant(&mut self, family: Uuid, permission: Uuid) -> bool {
        if !self.permissions.contains_key(&permission) {
            return false;
        }
        match self.nodes.get_mut(&family) {
            Some(node) => {
                if !node.permissions.contains(&permission) {
                    node.permissions.push(permission);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn family(&self, id: Uuid) -> Option<&Family> {
        self.nodes.get(&id).map(|n| &n.family)
    }

    pub fn permission(&self, id: Uuid) -> Option<&Permission> {
        self.permissions.get(&id)
    }

    pub fn families(&self) -> impl Iterator<Item = &Family> {
        self.nodes.values().map(|n| &n.family)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parents(&self, id: Uuid) -> &[Uuid] {
        self.nodes.get(&id).map(|n| n.parents.as_slice()).unwrap_or(&[])
    }

    pub fn children(&self, id: Uuid) -> &[Uuid] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn direct_permission_ids(&self, id: Uuid) -> &[Uuid] {
        self.nodes
            .get(&id)
            .map(|n| n.permissions.as_slice())
            .unwrap_or(&[])
    }

    /// Permissions granted directly to a family, ordered by name.
    pub fn direct_permissions(&self, id: Uuid) -> Vec<&Permission> {
        let mut perms: Vec<&Permission> = self
            .direct_permission_ids(id)
            .iter()
            .filter_map(|p| self.permissions.get(p))
            .collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        perms
    }

    /// Children of a family, ordered by name.
    pub fn sorted_children(&self, id: Uuid) -> Vec<&Family> {
        self.sorted(self.children(id))
    }

    /// Families without parents, ordered by name.
    pub fn roots(&self) -> Vec<&Family> {
        let mut roots: Vec<&Family> = self
            .nodes
            .values()
            .filter(|n| n.parents.is_empty())
            .map(|n| &n.family)
            .collect();
        sort_families(&mut roots);
        roots
    }

    /// Resolve ids to families ordered by (name, id), skipping unknown ids.
    pub fn sorted(&self, ids: &[Uuid]) -> Vec<&Family> {
        let mut families: Vec<&Family> = ids.iter().filter_map(|id| self.family(*id)).collect();
        sort_families(&mut families);
        families.dedup_by_key(|f| f.id);
        families
    }

    /// Every family transitively above `id`, nearest first. Excludes `id`.
    pub fn ancestors(&self, id: Uuid) -> Vec<Uuid> {
        self.reachable(id, Direction::Up)
    }

    /// Every family transitively below `id`, nearest first. Excludes `id`.
    pub fn descendants(&self, id: Uuid) -> Vec<Uuid> {
        self.reachable(id, Direction::Down)
    }

    fn reachable(&self, start: Uuid, direction: Direction) -> Vec<Uuid> {
        let mut visited = HashSet::from([start]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for next in node.neighbours(direction) {
                if visited.insert(*next) {
                    order.push(*next);
                    queue.push_back(*next);
                }
            }
        }

        order
    }

    /// Copy of the graph where `family_id` has exactly the given parents
    /// and children. Unknown ids are ignored.
    pub fn with_relations(&self, family_id: Uuid, parent_ids: &[Uuid], child_ids: &[Uuid]) -> Self {
        let mut next = self.clone();
        let (old_parents, old_children) = match next.nodes.get_mut(&family_id) {
            Some(node) => (
                std::mem::take(&mut node.parents),
                std::mem::take(&mut node.children),
            ),
            None => return next,
        };

        for parent in old_parents {
            if let Some(p) = next.nodes.get_mut(&parent) {
                p.children.retain(|c| *c != family_id);
            }
        }
        for child in old_children {
            if let Some(c) = next.nodes.get_mut(&child) {
                c.parents.retain(|p| *p != family_id);
            }
        }

        for parent in parent_ids {
            next.link(family_id, *parent);
        }
        for child in child_ids {
            next.link(*child, family_id);
        }
        next
    }

    /// Copy of the graph where `family_id` holds exactly the given
    /// permissions. Unknown ids are ignored.
    pub fn with_family_permissions(&self, family_id: Uuid, permission_ids: &[Uuid]) -> Self {
        let mut next = self.clone();
        if let Some(node) = next.nodes.get_mut(&family_id) {
            node.permissions.clear();
        }
        for permission in permission_ids {
            next.grant(family_id, *permission);
        }
        next
    }
}

fn sort_families(families: &mut [&Family]) {
    families.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}
