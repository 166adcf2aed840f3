use crate::ids::{ClientKey, NodeId, Version};
use crate::item::{Attributes, VersionedItem};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The four notification kinds the server pushes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeltaKind {
    /// Insert, or update when the dedup key already resolves to an older item.
    Create,
    /// Merge attributes into an existing item; may also move it.
    Update,
    /// Remove the item and, by cascade, its subtree.
    Delete,
    /// Idempotent upsert that replaces the attribute set wholesale.
    Full,
}

/// One incremental change notification for a single item.
///
/// `parent_id` on an `Update` or `Full` delta is optional: `None` keeps the stored parent. On a
/// `Create` it marks the item as a root. `Delete` ignores both `parent_id` and `attributes`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Delta {
    pub kind: DeltaKind,
    pub id: NodeId,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub client_key: Option<ClientKey>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent_id: Option<NodeId>,
    pub version: Version,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub attributes: Option<Attributes>,
}

impl Delta {
    fn new(kind: DeltaKind, id: NodeId, parent_id: Option<NodeId>, version: Version) -> Self {
        Self {
            kind,
            id,
            client_key: None,
            parent_id,
            version,
            attributes: None,
        }
    }

    pub fn create(id: NodeId, parent_id: Option<NodeId>, version: Version) -> Self {
        Self::new(DeltaKind::Create, id, parent_id, version)
    }

    pub fn update(id: NodeId, version: Version) -> Self {
        Self::new(DeltaKind::Update, id, None, version)
    }

    /// Update that also reparents the item under `new_parent`.
    pub fn move_to(id: NodeId, new_parent: NodeId, version: Version) -> Self {
        Self::new(DeltaKind::Update, id, Some(new_parent), version)
    }

    pub fn delete(id: NodeId, version: Version) -> Self {
        Self::new(DeltaKind::Delete, id, None, version)
    }

    pub fn full(id: NodeId, parent_id: Option<NodeId>, version: Version) -> Self {
        Self::new(DeltaKind::Full, id, parent_id, version)
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(ClientKey::new(key));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(Attributes::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// The item this delta describes when it lands on an empty slot.
    pub fn to_item(&self) -> VersionedItem {
        VersionedItem {
            id: self.id,
            client_key: self.client_key.clone(),
            parent_id: self.parent_id,
            version: self.version,
            attributes: self.attributes.clone().unwrap_or_default(),
        }
    }
}
