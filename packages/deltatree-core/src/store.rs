use std::collections::HashMap;

use tracing::warn;

use crate::delta::{Delta, DeltaKind};
use crate::error::DeltaRejection;
use crate::ids::{ClientKey, NodeId};
use crate::item::{Attributes, VersionedItem};

/// The single mutation an accepted delta performs on the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    Added(VersionedItem),
    /// `previous.id` differs from `current.id` when an optimistic item takes its server id.
    Changed {
        previous: VersionedItem,
        current: VersionedItem,
    },
    Removed(VersionedItem),
}

impl StoreEvent {
    pub fn id(&self) -> NodeId {
        match self {
            StoreEvent::Added(item) | StoreEvent::Removed(item) => item.id,
            StoreEvent::Changed { current, .. } => current.id,
        }
    }
}

/// Difference between the store contents before and after a [`ItemStore::bulk_load`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkChanges {
    /// In snapshot order.
    pub added: Vec<VersionedItem>,
    /// `(previous, current)` pairs for items whose stored record differs, in snapshot order.
    pub changed: Vec<(VersionedItem, VersionedItem)>,
    /// Sorted by id.
    pub removed: Vec<VersionedItem>,
}

impl BulkChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Flat, id-indexed table of items with the per-item version rules applied on every delta.
#[derive(Clone, Debug, Default)]
pub struct ItemStore {
    items: HashMap<NodeId, VersionedItem>,
    // ids per client key in insertion order; more than one entry means corrupted dedup keys
    client_keys: HashMap<ClientKey, Vec<NodeId>>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&VersionedItem> {
        self.items.get(&id)
    }

    /// First item registered under `key`.
    pub fn get_by_client_key(&self, key: &ClientKey) -> Option<&VersionedItem> {
        self.key_matches(key)
            .first()
            .and_then(|id| self.items.get(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionedItem> {
        self.items.values()
    }

    /// Replace the whole table with `items` and report what changed.
    ///
    /// A snapshot listing the same id twice keeps the higher version (first copy on a tie).
    pub fn bulk_load(&mut self, items: Vec<VersionedItem>) -> BulkChanges {
        let mut incoming: HashMap<NodeId, VersionedItem> = HashMap::with_capacity(items.len());
        let mut order = Vec::with_capacity(items.len());
        for item in items {
            match incoming.get(&item.id).map(|existing| existing.version) {
                Some(existing_version) => {
                    warn!(
                        id = %item.id,
                        kept = existing_version.max(item.version),
                        "snapshot lists the same id more than once"
                    );
                    if item.version > existing_version {
                        incoming.insert(item.id, item);
                    }
                }
                None => {
                    order.push(item.id);
                    incoming.insert(item.id, item);
                }
            }
        }

        let mut previous = std::mem::take(&mut self.items);
        let mut changes = BulkChanges::default();
        for id in &order {
            let Some(item) = incoming.get(id) else {
                continue;
            };
            match previous.remove(id) {
                None => changes.added.push(item.clone()),
                Some(prev) if prev != *item => changes.changed.push((prev, item.clone())),
                Some(_) => {}
            }
        }
        let mut removed: Vec<VersionedItem> = previous.into_values().collect();
        removed.sort_by_key(|item| item.id);
        changes.removed = removed;

        self.items = incoming;
        self.client_keys.clear();
        for id in &order {
            if let Some(key) = self.items.get(id).and_then(|item| item.client_key.clone()) {
                self.client_keys.entry(key).or_default().push(*id);
            }
        }
        changes
    }

    /// Plan and commit `delta` in one step.
    pub fn apply_delta(&mut self, delta: &Delta) -> Result<StoreEvent, DeltaRejection> {
        let event = self.plan(delta)?;
        self.commit(&event);
        Ok(event)
    }

    /// Decide what `delta` would do without touching the store.
    pub fn plan(&self, delta: &Delta) -> Result<StoreEvent, DeltaRejection> {
        match delta.kind {
            DeltaKind::Create => self.plan_create(delta),
            DeltaKind::Update => self.plan_update(delta),
            DeltaKind::Delete => self.plan_delete(delta),
            DeltaKind::Full => self.plan_full(delta),
        }
    }

    /// Apply an event previously returned by [`ItemStore::plan`].
    pub fn commit(&mut self, event: &StoreEvent) {
        match event {
            StoreEvent::Added(item) => self.insert(item.clone()),
            StoreEvent::Changed { previous, current } => {
                self.unindex_key(previous);
                if previous.id != current.id {
                    self.items.remove(&previous.id);
                    for item in self.items.values_mut() {
                        if item.parent_id == Some(previous.id) {
                            item.parent_id = Some(current.id);
                        }
                    }
                }
                self.insert(current.clone());
            }
            StoreEvent::Removed(item) => {
                self.remove(item.id);
            }
        }
    }

    /// Drop an item outright, bypassing the version rules. Used for cascade removal.
    pub fn remove(&mut self, id: NodeId) -> Option<VersionedItem> {
        let item = self.items.remove(&id)?;
        self.unindex_key(&item);
        Some(item)
    }

    /// Empty the store, returning the previous contents sorted by id.
    pub fn clear(&mut self) -> Vec<VersionedItem> {
        self.client_keys.clear();
        let mut items: Vec<VersionedItem> = self.items.drain().map(|(_, item)| item).collect();
        items.sort_by_key(|item| item.id);
        items
    }

    // A key match under another id is the server echo of an optimistic create; the item is
    // re-keyed to the delta's id unless that id already belongs to a different item.
    fn plan_create(&self, delta: &Delta) -> Result<StoreEvent, DeltaRejection> {
        let existing = match &delta.client_key {
            Some(key) => match self.key_matches(key) {
                [] => self.items.get(&delta.id),
                [only] if *only != delta.id && self.items.contains_key(&delta.id) => {
                    return Err(DeltaRejection::IdentityMismatch {
                        id: delta.id,
                        existing: *only,
                    })
                }
                [only] => self.items.get(only),
                many => {
                    return Err(DeltaRejection::DuplicateIdConflict {
                        key: key.clone(),
                        matches: many.len(),
                    })
                }
            },
            None => self.items.get(&delta.id),
        };
        match existing {
            None => Ok(StoreEvent::Added(delta.to_item())),
            Some(stored) => {
                ensure_newer(stored, delta)?;
                Ok(StoreEvent::Changed {
                    previous: stored.clone(),
                    current: merged(stored, delta, false),
                })
            }
        }
    }

    fn plan_update(&self, delta: &Delta) -> Result<StoreEvent, DeltaRejection> {
        let stored = self
            .items
            .get(&delta.id)
            .ok_or(DeltaRejection::UnknownItemUpdate { id: delta.id })?;
        ensure_newer(stored, delta)?;
        Ok(StoreEvent::Changed {
            previous: stored.clone(),
            current: merged(stored, delta, false),
        })
    }

    fn plan_delete(&self, delta: &Delta) -> Result<StoreEvent, DeltaRejection> {
        let stored = self
            .items
            .get(&delta.id)
            .ok_or(DeltaRejection::UnknownItemDelete { id: delta.id })?;
        ensure_newer(stored, delta)?;
        Ok(StoreEvent::Removed(stored.clone()))
    }

    fn plan_full(&self, delta: &Delta) -> Result<StoreEvent, DeltaRejection> {
        if let Some(key) = &delta.client_key {
            if let Some(existing) = self.key_matches(key).iter().find(|id| **id != delta.id) {
                return Err(DeltaRejection::IdentityMismatch {
                    id: delta.id,
                    existing: *existing,
                });
            }
        }
        match self.items.get(&delta.id) {
            None => Ok(StoreEvent::Added(delta.to_item())),
            Some(stored) => {
                if let (Some(stored_key), Some(key)) = (&stored.client_key, &delta.client_key) {
                    if stored_key != key {
                        return Err(DeltaRejection::IdentityMismatch {
                            id: delta.id,
                            existing: stored.id,
                        });
                    }
                }
                ensure_newer(stored, delta)?;
                Ok(StoreEvent::Changed {
                    previous: stored.clone(),
                    current: merged(stored, delta, true),
                })
            }
        }
    }

    fn key_matches(&self, key: &ClientKey) -> &[NodeId] {
        self.client_keys
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn insert(&mut self, item: VersionedItem) {
        if let Some(key) = &item.client_key {
            let ids = self.client_keys.entry(key.clone()).or_default();
            if !ids.contains(&item.id) {
                ids.push(item.id);
            }
        }
        self.items.insert(item.id, item);
    }

    fn unindex_key(&mut self, item: &VersionedItem) {
        let Some(key) = &item.client_key else {
            return;
        };
        if let Some(ids) = self.client_keys.get_mut(key) {
            ids.retain(|id| *id != item.id);
            if ids.is_empty() {
                self.client_keys.remove(key);
            }
        }
    }
}

fn ensure_newer(stored: &VersionedItem, delta: &Delta) -> Result<(), DeltaRejection> {
    if stored.version >= delta.version {
        return Err(DeltaRejection::StaleDeltaIgnored {
            id: stored.id,
            stored: stored.version,
            incoming: delta.version,
        });
    }
    Ok(())
}

/// The stored item advanced to `delta`, under the delta's id. `replace` swaps the attribute set
/// instead of merging.
fn merged(stored: &VersionedItem, delta: &Delta, replace: bool) -> VersionedItem {
    let attributes = match (&delta.attributes, replace) {
        (Some(incoming), true) => incoming.clone(),
        (None, true) => Attributes::new(),
        (Some(incoming), false) => {
            let mut attributes = stored.attributes.clone();
            attributes.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
            attributes
        }
        (None, false) => stored.attributes.clone(),
    };
    VersionedItem {
        id: delta.id,
        client_key: delta
            .client_key
            .clone()
            .or_else(|| stored.client_key.clone()),
        parent_id: delta.parent_id.or(stored.parent_id),
        version: delta.version,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> NodeId {
        NodeId(n)
    }

    #[test]
    fn update_merges_attributes_and_keeps_parent() {
        let mut store = ItemStore::new();
        store
            .apply_delta(
                &Delta::create(id(1), Some(id(0)), 1)
                    .with_attribute("name", "a")
                    .with_attribute("kind", "dir"),
            )
            .unwrap();

        let event = store
            .apply_delta(&Delta::update(id(1), 2).with_attribute("name", "b"))
            .unwrap();

        let StoreEvent::Changed { previous, current } = event else {
            panic!("expected a change event");
        };
        assert_eq!(previous.version, 1);
        assert_eq!(current.version, 2);
        assert_eq!(current.parent_id, Some(id(0)));
        assert_eq!(current.attribute("name"), Some("b"));
        assert_eq!(current.attribute("kind"), Some("dir"));
    }

    #[test]
    fn full_replaces_attributes() {
        let mut store = ItemStore::new();
        store
            .apply_delta(&Delta::create(id(1), Some(id(0)), 1).with_attribute("stale", "x"))
            .unwrap();
        store
            .apply_delta(&Delta::full(id(1), Some(id(0)), 2).with_attribute("name", "fresh"))
            .unwrap();

        let item = store.get(id(1)).unwrap();
        assert_eq!(item.attribute("stale"), None);
        assert_eq!(item.attribute("name"), Some("fresh"));
    }

    #[test]
    fn plan_does_not_mutate() {
        let store = ItemStore::new();
        let event = store.plan(&Delta::create(id(4), None, 1)).unwrap();
        assert!(matches!(event, StoreEvent::Added(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn removing_an_item_frees_its_client_key() {
        let mut store = ItemStore::new();
        store
            .apply_delta(&Delta::create(id(7), Some(id(0)), 1).with_client_key("tmp-7"))
            .unwrap();
        assert!(store.get_by_client_key(&ClientKey::new("tmp-7")).is_some());

        store.apply_delta(&Delta::delete(id(7), 2)).unwrap();
        assert!(store.get_by_client_key(&ClientKey::new("tmp-7")).is_none());
    }

    #[test]
    fn bulk_load_keeps_highest_duplicate() {
        let mut store = ItemStore::new();
        let changes = store.bulk_load(vec![
            VersionedItem::new(id(1), None, 3),
            VersionedItem::new(id(1), None, 5),
            VersionedItem::new(id(1), None, 4),
        ]);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(store.get(id(1)).unwrap().version, 5);
    }
}
