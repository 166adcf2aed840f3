use tracing::debug;

use crate::delta::Delta;
use crate::error::{DeltaRejection, Result};
use crate::events::ChangeEvent;
use crate::ids::NodeId;
use crate::item::VersionedItem;
use crate::reader::TreeReader;
use crate::store::{BulkChanges, ItemStore, StoreEvent};
use crate::tree::TreeIndex;

/// An item store and the tree index derived from it, kept in lockstep.
///
/// Every accepted store mutation is routed synchronously into the index before the call
/// returns, so the pair is never observed half-updated.
#[derive(Clone, Debug)]
pub struct Mirror {
    store: ItemStore,
    index: TreeIndex,
}

impl Mirror {
    pub fn new(root: NodeId) -> Self {
        Self {
            store: ItemStore::new(),
            index: TreeIndex::new(root),
        }
    }

    pub fn root(&self) -> NodeId {
        self.index.root()
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn index(&self) -> &TreeIndex {
        &self.index
    }

    pub fn reader(&self) -> TreeReader<'_> {
        TreeReader::new(&self.store, &self.index)
    }

    /// Apply one delta to both structures and return the resulting consumer events.
    ///
    /// A move whose parent chain loops back to the item is still stored; the node is held
    /// detached until a later change breaks the loop.
    pub fn apply_delta(
        &mut self,
        delta: &Delta,
    ) -> std::result::Result<Vec<ChangeEvent>, DeltaRejection> {
        let event = self.store.apply_delta(delta)?;
        Ok(self.reconcile(event))
    }

    /// Replace the store contents with a snapshot and reconcile the index incrementally.
    pub fn load_snapshot(
        &mut self,
        items: Vec<VersionedItem>,
    ) -> (BulkChanges, Vec<ChangeEvent>) {
        let changes = self.store.bulk_load(items);
        self.index.apply_bulk(&changes);

        let mut events =
            Vec::with_capacity(changes.added.len() + changes.changed.len() + changes.removed.len());
        events.extend(changes.removed.iter().map(|item| ChangeEvent::Removed {
            id: item.id,
            parent: item.parent_id,
        }));
        events.extend(changes.added.iter().map(|item| ChangeEvent::Added {
            id: item.id,
            parent: item.parent_id,
        }));
        events.extend(
            changes
                .changed
                .iter()
                .map(|(previous, current)| ChangeEvent::Changed {
                    id: current.id,
                    previous_parent: previous.parent_id,
                    parent: current.parent_id,
                }),
        );
        debug!(
            added = changes.added.len(),
            changed = changes.changed.len(),
            removed = changes.removed.len(),
            "snapshot reconciled"
        );
        (changes, events)
    }

    /// Drop everything and start over under `root`, reporting every dropped item as removed.
    pub fn retarget(&mut self, root: NodeId) -> Vec<ChangeEvent> {
        let events = self
            .store
            .clear()
            .into_iter()
            .map(|item| ChangeEvent::Removed {
                id: item.id,
                parent: item.parent_id,
            })
            .collect();
        self.index = TreeIndex::new(root);
        events
    }

    pub fn validate_invariants(&self) -> Result<()> {
        self.index.validate_invariants(&self.store)
    }

    fn reconcile(&mut self, event: StoreEvent) -> Vec<ChangeEvent> {
        match event {
            StoreEvent::Added(item) => {
                self.index.on_added(&item);
                vec![ChangeEvent::Added {
                    id: item.id,
                    parent: item.parent_id,
                }]
            }
            StoreEvent::Changed { previous, current } => {
                self.index.on_changed(&previous, &current);
                let mut events = Vec::with_capacity(2);
                if previous.id != current.id {
                    events.push(ChangeEvent::Rekeyed {
                        previous_id: previous.id,
                        id: current.id,
                    });
                }
                events.push(ChangeEvent::Changed {
                    id: current.id,
                    previous_parent: previous.parent_id,
                    parent: current.parent_id,
                });
                events
            }
            StoreEvent::Removed(item) => self.cascade_remove(item),
        }
    }

    // The server may send a single delete for the top of a subtree; descendants go with it.
    fn cascade_remove(&mut self, item: VersionedItem) -> Vec<ChangeEvent> {
        let mut events = vec![ChangeEvent::Removed {
            id: item.id,
            parent: item.parent_id,
        }];
        for id in self.index.remove_subtree(item.id).into_iter().skip(1) {
            if let Some(descendant) = self.store.remove(id) {
                events.push(ChangeEvent::Removed {
                    id,
                    parent: descendant.parent_id,
                });
            }
        }
        if events.len() > 1 {
            debug!(id = %item.id, descendants = events.len() - 1, "cascade delete");
        }
        events
    }
}
