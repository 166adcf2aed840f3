use std::collections::BTreeMap;

use crate::ids::{ClientKey, NodeId, Version};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque payload carried by an item (name, type, flags, ...). Never interpreted here.
pub type Attributes = BTreeMap<String, String>;

/// One record of the mirrored collection.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct VersionedItem {
    pub id: NodeId,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub client_key: Option<ClientKey>,
    /// Containing node; `None` only for the watch root.
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent_id: Option<NodeId>,
    pub version: Version,
    #[cfg_attr(feature = "serde", serde(default))]
    pub attributes: Attributes,
}

impl VersionedItem {
    pub fn new(id: NodeId, parent_id: Option<NodeId>, version: Version) -> Self {
        Self {
            id,
            client_key: None,
            parent_id,
            version,
            attributes: Attributes::new(),
        }
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(ClientKey::new(key));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
