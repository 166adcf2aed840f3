use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::item::VersionedItem;
use crate::store::{BulkChanges, ItemStore};

/// Whether a node is backed by a stored item yet, and whether it hangs in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Placeholder for a parent that children referenced before its own item arrived.
    Pending,
    Materialized,
    /// Backed by an item whose parent chain loops back to it. Held out of the tree, with its
    /// subtree, until the loop is broken.
    Detached,
}

#[derive(Clone, Debug)]
pub struct TreeNode {
    parent: Option<NodeId>,
    // parent named by the stored item; equal to `parent` unless detached
    wanted: Option<NodeId>,
    children: Vec<NodeId>,
    state: NodeState,
}

impl TreeNode {
    fn with_state(state: NodeState) -> Self {
        Self {
            parent: None,
            wanted: None,
            children: Vec::new(),
            state,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Parent recorded on the stored item.
    pub fn wanted_parent(&self) -> Option<NodeId> {
        self.wanted
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == NodeState::Pending
    }

    pub fn is_detached(&self) -> bool {
        self.state == NodeState::Detached
    }
}

/// Parent/children adjacency derived from the item store.
///
/// The index only changes in reaction to store events (`on_added`, `on_changed`,
/// `remove_subtree`, `apply_bulk`); it never decides on its own that an item exists.
///
/// The attached shape depends only on the stored parents: every item hangs under the parent
/// its record names, except that each loop in those parent pointers is cut at its smallest
/// id, which is held as [`NodeState::Detached`]. Arrival order only shows in sibling order.
#[derive(Clone, Debug)]
pub struct TreeIndex {
    root: NodeId,
    nodes: HashMap<NodeId, TreeNode>,
    detached: BTreeSet<NodeId>,
}

impl TreeIndex {
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            nodes: HashMap::new(),
            detached: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_pending(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(TreeNode::is_pending)
    }

    pub fn is_detached(&self, id: NodeId) -> bool {
        self.detached.contains(&id)
    }

    /// Number of nodes, placeholders included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of placeholders that are still waiting for their item, sorted.
    pub fn pending(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.is_pending())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Ids of nodes held out of the tree by a parent loop, sorted.
    pub fn detached(&self) -> Vec<NodeId> {
        self.detached.iter().copied().collect()
    }

    /// Materialize `item`, promoting its placeholder if one exists, and hang it under its
    /// parent (creating a placeholder for the parent when it is not known yet).
    pub fn on_added(&mut self, item: &VersionedItem) {
        self.materialize(item);
        self.settle(&[item.id]);
    }

    /// Follow a change of `current`'s record. Returns `true` when the node's attachment
    /// changed.
    ///
    /// A record whose id differs from `previous` re-keys the node in place.
    pub fn on_changed(&mut self, previous: &VersionedItem, current: &VersionedItem) -> bool {
        if previous.id != current.id {
            self.rekey(previous.id, current.id);
        }
        if !self.nodes.contains_key(&current.id) {
            self.on_added(current);
            return false;
        }

        let before = self.parent(current.id);
        if let Some(node) = self.nodes.get_mut(&current.id) {
            node.wanted = current.parent_id;
        }
        self.settle(&[current.id]);
        let after = self.parent(current.id);
        if before == after {
            return false;
        }
        debug!(
            id = %current.id,
            from = ?before,
            to = ?after,
            "reparented"
        );
        true
    }

    /// Detach `id` and delete it together with every descendant.
    ///
    /// Returns the removed ids in pre-order, `id` first.
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.nodes.contains_key(&id) {
            return Vec::new();
        }
        Self::detach(&mut self.nodes, id);

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children.iter().rev().copied());
                self.detached.remove(&current);
                removed.push(current);
            }
        }
        // A detached node whose loop ran through the removed subtree can hang again.
        self.settle(&[]);
        removed
    }

    /// Reconcile the adjacency with the result of a bulk load without rebuilding it.
    ///
    /// Every added and changed record takes its new parent before anything is reattached,
    /// so moves inside one snapshot are judged against the snapshot, not the old tree.
    /// Snapshot removals do not cascade: a removed node that still hosts children becomes a
    /// placeholder for them.
    pub fn apply_bulk(&mut self, changes: &BulkChanges) {
        let mut demoted = Vec::new();
        let mut touched = Vec::with_capacity(changes.added.len() + changes.changed.len());
        for item in &changes.removed {
            let Some(has_children) = self.nodes.get(&item.id).map(|n| !n.children.is_empty())
            else {
                continue;
            };
            Self::detach(&mut self.nodes, item.id);
            self.detached.remove(&item.id);
            if has_children {
                if let Some(node) = self.nodes.get_mut(&item.id) {
                    node.wanted = None;
                    node.state = NodeState::Pending;
                }
                demoted.push(item.id);
            } else {
                self.nodes.remove(&item.id);
            }
        }

        for item in &changes.added {
            self.materialize(item);
            touched.push(item.id);
        }
        for (_, current) in &changes.changed {
            if let Some(node) = self.nodes.get_mut(&current.id) {
                node.wanted = current.parent_id;
                touched.push(current.id);
            } else {
                self.materialize(current);
                touched.push(current.id);
            }
        }
        self.settle(&touched);

        for id in demoted {
            let orphaned = self
                .nodes
                .get(&id)
                .is_some_and(|n| n.is_pending() && n.children.is_empty());
            if orphaned {
                self.nodes.remove(&id);
            }
        }
    }

    /// Validate invariants: unique parent for each node, children parent pointers consistent,
    /// no cycles, every node tracking its stored item's parent, and materialized nodes in
    /// one-to-one correspondence with stored items.
    /// Intended for tests and debugging.
    pub fn validate_invariants(&self, store: &ItemStore) -> Result<()> {
        for (pid, pnode) in &self.nodes {
            let mut seen = HashSet::new();
            for child in &pnode.children {
                if !seen.insert(child) {
                    return Err(Error::InconsistentState(format!(
                        "duplicate child {child} under {pid}"
                    )));
                }
                match self.nodes.get(child) {
                    Some(cnode) if cnode.parent == Some(*pid) => {}
                    Some(_) => {
                        return Err(Error::InconsistentState(format!(
                            "child {child} does not point back to {pid}"
                        )))
                    }
                    None => {
                        return Err(Error::InconsistentState(format!(
                            "child {child} of {pid} not present in nodes"
                        )))
                    }
                }
            }

            if let Some(parent) = pnode.parent {
                let listed = self
                    .nodes
                    .get(&parent)
                    .is_some_and(|p| p.children.contains(pid));
                if !listed {
                    return Err(Error::InconsistentState(format!(
                        "{pid} is missing from the children of {parent}"
                    )));
                }
            }
            if let Some(wanted) = pnode.wanted {
                if !self.nodes.contains_key(&wanted) {
                    return Err(Error::InconsistentState(format!(
                        "{pid} names parent {wanted}, which has no node"
                    )));
                }
            }

            match (pnode.state, store.get(*pid)) {
                (NodeState::Pending, Some(_)) => {
                    return Err(Error::InconsistentState(format!(
                        "placeholder {pid} has a stored item"
                    )));
                }
                (NodeState::Pending, None) if pnode.parent.is_some() || pnode.wanted.is_some() => {
                    return Err(Error::InconsistentState(format!(
                        "placeholder {pid} is attached to a parent"
                    )));
                }
                (NodeState::Materialized | NodeState::Detached, None) => {
                    return Err(Error::InconsistentState(format!(
                        "node {pid} has no stored item"
                    )));
                }
                (_, Some(item)) if item.parent_id != pnode.wanted => {
                    return Err(Error::InconsistentState(format!(
                        "node {pid} tracks parent {:?} but its item names {:?}",
                        pnode.wanted, item.parent_id
                    )));
                }
                (NodeState::Materialized, Some(_)) if pnode.parent != pnode.wanted => {
                    return Err(Error::InconsistentState(format!(
                        "{pid} hangs under {:?} instead of {:?}",
                        pnode.parent, pnode.wanted
                    )));
                }
                (NodeState::Detached, Some(_))
                    if pnode.parent.is_some() || self.loop_head(*pid) != Some(*pid) =>
                {
                    return Err(Error::InconsistentState(format!(
                        "detached node {pid} does not head a parent loop"
                    )));
                }
                _ => {}
            }
            if pnode.is_detached() != self.detached.contains(pid) {
                return Err(Error::InconsistentState(format!(
                    "detached set disagrees with the state of {pid}"
                )));
            }
        }

        if let Some(id) = self.detached.iter().find(|id| !self.nodes.contains_key(id)) {
            return Err(Error::InconsistentState(format!(
                "detached id {id} has no node"
            )));
        }
        if let Some(item) = store.iter().find(|item| !self.nodes.contains_key(&item.id)) {
            return Err(Error::InconsistentState(format!(
                "stored item {} has no tree node",
                item.id
            )));
        }

        for node in self.nodes.keys() {
            if self.has_cycle_from(*node) {
                return Err(Error::InconsistentState(format!("cycle through {node}")));
            }
        }
        Ok(())
    }

    fn has_cycle_from(&self, start: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut current = Some(start);
        while let Some(n) = current {
            if !visited.insert(n) {
                return true;
            }
            current = self.nodes.get(&n).and_then(|s| s.parent);
        }
        false
    }

    fn materialize(&mut self, item: &VersionedItem) {
        let node = self
            .nodes
            .entry(item.id)
            .or_insert_with(|| TreeNode::with_state(NodeState::Materialized));
        if node.is_pending() {
            debug!(id = %item.id, children = node.children.len(), "promoting placeholder");
            node.state = NodeState::Materialized;
        }
        node.wanted = item.parent_id;
    }

    /// Bring `touched`, and every node currently detached, in line with the parents their
    /// items name.
    ///
    /// Every other node already hangs under its wanted parent, so any loop in the wanted
    /// pointers runs through one of these. Cutting each loop at its smallest id first means
    /// no intermediate state attaches a cycle.
    fn settle(&mut self, touched: &[NodeId]) {
        let mut targets = Vec::with_capacity(touched.len() + self.detached.len());
        let mut seen = HashSet::new();
        for id in touched.iter().chain(self.detached.iter()) {
            if self.nodes.contains_key(id) && seen.insert(*id) {
                targets.push(*id);
            }
        }

        let heads: BTreeSet<NodeId> = targets
            .iter()
            .filter_map(|id| self.loop_head(*id))
            .collect();
        for head in &heads {
            if seen.insert(*head) {
                targets.push(*head);
            }
        }

        let desired: Vec<(NodeId, Option<NodeId>)> = targets
            .iter()
            .map(|id| {
                let wanted = if heads.contains(id) {
                    None
                } else {
                    self.nodes.get(id).and_then(|n| n.wanted)
                };
                (*id, wanted)
            })
            .collect();

        for (id, parent) in &desired {
            if self.parent(*id) != *parent {
                Self::detach(&mut self.nodes, *id);
            }
        }
        for (id, parent) in &desired {
            if let Some(parent) = parent {
                if self.parent(*id) != Some(*parent) {
                    self.ensure_placeholder(*parent);
                    Self::attach(&mut self.nodes, *id, *parent);
                }
            }
            self.mark(*id);
        }
    }

    fn mark(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.is_pending() {
            self.detached.remove(&id);
            return;
        }
        let held_out = node.parent.is_none() && node.wanted.is_some();
        match (held_out, node.state) {
            (true, NodeState::Materialized) => {
                warn!(id = %id, parent = ?node.wanted, "parent chain loops back; holding node detached");
                node.state = NodeState::Detached;
                self.detached.insert(id);
            }
            (false, NodeState::Detached) => {
                debug!(id = %id, parent = ?node.parent, "reattached");
                node.state = NodeState::Materialized;
                self.detached.remove(&id);
            }
            _ => {}
        }
    }

    /// Smallest id on the loop of wanted parents through `start`, if `start` is on one.
    fn loop_head(&self, start: NodeId) -> Option<NodeId> {
        let mut visited = HashSet::new();
        let mut head = start;
        let mut current = self.nodes.get(&start)?.wanted?;
        loop {
            if current == start {
                return Some(head);
            }
            if !visited.insert(current) {
                return None;
            }
            head = head.min(current);
            current = self.nodes.get(&current)?.wanted?;
        }
    }

    /// Move the node for `from` to `to`, keeping its place among its siblings. A placeholder
    /// already standing in for `to` hands its children over.
    fn rekey(&mut self, from: NodeId, to: NodeId) {
        let Some(mut node) = self.nodes.remove(&from) else {
            return;
        };
        if let Some(placeholder) = self.nodes.remove(&to) {
            for child in placeholder.children {
                if child != from && !node.children.contains(&child) {
                    node.children.push(child);
                }
            }
        }
        if node.parent == Some(to) {
            node.parent = None;
        }
        if node.wanted == Some(from) {
            node.wanted = Some(to);
        }
        for other in self.nodes.values_mut() {
            if other.parent == Some(from) {
                other.parent = Some(to);
            }
            if other.wanted == Some(from) {
                other.wanted = Some(to);
            }
            for child in &mut other.children {
                if *child == from {
                    *child = to;
                }
            }
        }
        if self.detached.remove(&from) {
            self.detached.insert(to);
        }
        debug!(from = %from, to = %to, "re-keyed node");
        self.nodes.insert(to, node);
    }

    fn ensure_placeholder(&mut self, id: NodeId) {
        self.nodes.entry(id).or_insert_with(|| {
            debug!(id = %id, "creating placeholder for forward-referenced parent");
            TreeNode::with_state(NodeState::Pending)
        });
    }

    fn detach(nodes: &mut HashMap<NodeId, TreeNode>, node: NodeId) {
        let Some(parent) = nodes.get_mut(&node).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = nodes.get_mut(&parent) {
            p.children.retain(|c| c != &node);
        }
    }

    fn attach(nodes: &mut HashMap<NodeId, TreeNode>, node: NodeId, parent: NodeId) {
        if let Some(parent_entry) = nodes.get_mut(&parent) {
            if !parent_entry.children.contains(&node) {
                parent_entry.children.push(node);
            }
        }
        if let Some(entry) = nodes.get_mut(&node) {
            entry.parent = Some(parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, parent: Option<u64>) -> VersionedItem {
        VersionedItem::new(NodeId(id), parent.map(NodeId), 1)
    }

    fn index_with(nodes: &[(u64, Option<u64>)]) -> TreeIndex {
        let mut index = TreeIndex::new(NodeId(0));
        for &(id, parent) in nodes {
            index.on_added(&item(id, parent));
        }
        index
    }

    #[test]
    fn child_before_parent_is_kept_under_placeholder() {
        let mut index = index_with(&[(0, None), (2, Some(1))]);

        assert!(index.is_pending(NodeId(1)));
        assert_eq!(index.children(NodeId(1)), &[NodeId(2)]);
        assert_eq!(index.parent(NodeId(1)), None);

        index.on_added(&item(1, Some(0)));
        assert!(!index.is_pending(NodeId(1)));
        assert_eq!(index.children(NodeId(1)), &[NodeId(2)]);
        assert_eq!(index.children(NodeId(0)), &[NodeId(1)]);
    }

    #[test]
    fn remove_subtree_is_pre_order() {
        let mut index =
            index_with(&[(0, None), (1, Some(0)), (2, Some(1)), (3, Some(2)), (4, Some(1))]);

        let removed = index.remove_subtree(NodeId(1));
        assert_eq!(removed, vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);
        assert!(index.children(NodeId(0)).is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn move_under_own_descendant_is_held_detached() {
        let mut index = index_with(&[(0, None), (1, Some(0)), (2, Some(1))]);

        let moved = index.on_changed(&item(1, Some(0)), &item(1, Some(2)));
        assert!(moved);
        assert_eq!(index.parent(NodeId(1)), None);
        assert!(index.is_detached(NodeId(1)));
        assert_eq!(index.children(NodeId(1)), &[NodeId(2)]);
        assert!(index.children(NodeId(0)).is_empty());

        // Moving the blocking descendant away lets the held node hang where it asked to.
        index.on_changed(&item(2, Some(1)), &item(2, Some(0)));
        assert!(index.detached().is_empty());
        assert_eq!(index.children(NodeId(0)), &[NodeId(2)]);
        assert_eq!(index.children(NodeId(2)), &[NodeId(1)]);
    }

    #[test]
    fn self_parent_is_held_detached() {
        let mut index = index_with(&[(0, None), (1, Some(0))]);

        index.on_changed(&item(1, Some(0)), &item(1, Some(1)));
        assert_eq!(index.detached(), vec![NodeId(1)]);
        assert!(index.children(NodeId(1)).is_empty());
    }

    #[test]
    fn loop_is_cut_at_its_smallest_id() {
        let index = index_with(&[(0, None), (3, Some(5)), (5, Some(4)), (4, Some(3))]);

        assert_eq!(index.detached(), vec![NodeId(3)]);
        assert_eq!(index.children(NodeId(3)), &[NodeId(4)]);
        assert_eq!(index.children(NodeId(4)), &[NodeId(5)]);
        assert_eq!(index.get(NodeId(3)).unwrap().wanted_parent(), Some(NodeId(5)));
    }

    #[test]
    fn bulk_changes_are_judged_against_the_new_parents() {
        let mut index = index_with(&[(0, None), (1, Some(0)), (2, Some(1))]);

        index.apply_bulk(&BulkChanges {
            changed: vec![
                (item(1, Some(0)), item(1, Some(2))),
                (item(2, Some(1)), item(2, Some(0))),
            ],
            ..BulkChanges::default()
        });

        assert_eq!(index.children(NodeId(0)), &[NodeId(2)]);
        assert_eq!(index.children(NodeId(2)), &[NodeId(1)]);
        assert!(index.detached().is_empty());
    }

    #[test]
    fn bulk_removal_demotes_parent_with_surviving_children() {
        let mut index = index_with(&[(0, None), (1, Some(0)), (2, Some(1))]);

        index.apply_bulk(&BulkChanges {
            removed: vec![item(1, Some(0))],
            ..BulkChanges::default()
        });

        assert!(index.is_pending(NodeId(1)));
        assert_eq!(index.children(NodeId(1)), &[NodeId(2)]);
        assert!(index.children(NodeId(0)).is_empty());
    }

    #[test]
    fn rekey_keeps_position_and_adopts_placeholder_children() {
        let mut index = index_with(&[(0, None), (1, Some(0)), (100, Some(0)), (2, Some(0)), (7, Some(5))]);
        assert!(index.is_pending(NodeId(5)));

        index.on_changed(&item(100, Some(0)), &item(5, Some(0)));

        assert!(!index.contains(NodeId(100)));
        assert_eq!(index.children(NodeId(0)), &[NodeId(1), NodeId(5), NodeId(2)]);
        assert_eq!(index.children(NodeId(5)), &[NodeId(7)]);
        assert_eq!(index.parent(NodeId(7)), Some(NodeId(5)));
        assert!(index.pending().is_empty());
    }
}
