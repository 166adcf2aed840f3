use crate::ids::{NodeId, Version};
use crate::item::Attributes;
use crate::store::ItemStore;
use crate::tree::TreeIndex;

static NO_ATTRIBUTES: Attributes = Attributes::new();

/// What a consumer sees of one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeView<'a> {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    /// Empty for placeholders.
    pub attributes: &'a Attributes,
    /// Referenced as a parent but its own item has not arrived; consumers may hide it.
    pub is_pending: bool,
    /// Held out of the tree because its recorded parent chain loops back to it. `parent_id`
    /// is `None` while detached; the item's own record still names its parent.
    pub is_detached: bool,
    pub version: Option<Version>,
}

/// Read-only view over a mirrored tree. Never mutates what it borrows.
#[derive(Clone, Copy, Debug)]
pub struct TreeReader<'a> {
    store: &'a ItemStore,
    index: &'a TreeIndex,
}

impl<'a> TreeReader<'a> {
    pub fn new(store: &'a ItemStore, index: &'a TreeIndex) -> Self {
        Self { store, index }
    }

    pub fn root(&self) -> NodeId {
        self.index.root()
    }

    pub fn node(&self, id: NodeId) -> Option<NodeView<'a>> {
        let node = self.index.get(id)?;
        let item = self.store.get(id);
        Some(NodeView {
            id,
            parent_id: node.parent(),
            attributes: item.map(|i| &i.attributes).unwrap_or(&NO_ATTRIBUTES),
            is_pending: node.is_pending(),
            is_detached: node.is_detached(),
            version: item.map(|i| i.version),
        })
    }

    /// Children in display order; empty for leaves and unknown ids.
    pub fn children(&self, id: NodeId) -> &'a [NodeId] {
        self.index.children(id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.index.parent(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains(id)
    }

    /// Number of nodes, placeholders included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// `id` and all of its descendants in pre-order. Empty when `id` is unknown.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        if !self.index.contains(id) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.index.children(current).iter().rev().copied());
        }
        out
    }
}
