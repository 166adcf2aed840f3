use std::collections::HashMap;

use tracing::trace;

use crate::delta::Delta;
use crate::ids::NodeId;

/// Deltas received while the snapshot for the watch scope is still in flight.
///
/// Receipt order is preserved for replay. The store's version check makes the replay
/// idempotent, so nothing is coalesced or reordered here.
#[derive(Clone, Debug, Default)]
pub struct PendingBuffer {
    deltas: Vec<Delta>,
    per_item: HashMap<NodeId, usize>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: Delta) {
        *self.per_item.entry(delta.id).or_default() += 1;
        trace!(
            id = %delta.id,
            kind = ?delta.kind,
            version = delta.version,
            buffered = self.deltas.len() + 1,
            "buffering delta"
        );
        self.deltas.push(delta);
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Buffered deltas for one item, in receipt order.
    pub fn for_item(&self, id: NodeId) -> impl Iterator<Item = &Delta> {
        self.deltas.iter().filter(move |delta| delta.id == id)
    }

    pub fn item_count(&self, id: NodeId) -> usize {
        self.per_item.get(&id).copied().unwrap_or(0)
    }

    /// Take every buffered delta in receipt order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Delta> {
        self.per_item.clear();
        std::mem::take(&mut self.deltas)
    }

    pub fn clear(&mut self) {
        self.per_item.clear();
        self.deltas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_receipt_order_across_items() {
        let mut buffer = PendingBuffer::new();
        buffer.push(Delta::update(NodeId(2), 5));
        buffer.push(Delta::create(NodeId(1), Some(NodeId(0)), 1));
        buffer.push(Delta::update(NodeId(2), 3));

        assert_eq!(buffer.item_count(NodeId(2)), 2);
        let versions: Vec<u64> = buffer.for_item(NodeId(2)).map(|d| d.version).collect();
        assert_eq!(versions, vec![5, 3]);

        let drained: Vec<(NodeId, u64)> =
            buffer.drain().iter().map(|d| (d.id, d.version)).collect();
        assert_eq!(drained, vec![(NodeId(2), 5), (NodeId(1), 1), (NodeId(2), 3)]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.item_count(NodeId(2)), 0);
    }
}
