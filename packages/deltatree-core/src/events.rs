use crate::ids::NodeId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Notification emitted to consumers after the tree has been fully reconciled.
///
/// A cascade removal produces the same `Removed` event as a direct delete.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")
)]
pub enum ChangeEvent {
    Added {
        id: NodeId,
        parent: Option<NodeId>,
    },
    Changed {
        id: NodeId,
        previous_parent: Option<NodeId>,
        parent: Option<NodeId>,
    },
    Removed {
        id: NodeId,
        parent: Option<NodeId>,
    },
    /// An optimistically created item took its server-assigned id. Followed by a `Changed`
    /// for the new id.
    Rekeyed { previous_id: NodeId, id: NodeId },
}

impl ChangeEvent {
    pub fn id(&self) -> NodeId {
        match self {
            ChangeEvent::Added { id, .. }
            | ChangeEvent::Changed { id, .. }
            | ChangeEvent::Removed { id, .. }
            | ChangeEvent::Rekeyed { id, .. } => *id,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, ChangeEvent::Changed { previous_parent, parent, .. } if previous_parent != parent)
    }
}

/// Receives every [`ChangeEvent`] synchronously, in emission order.
pub trait ChangeListener {
    fn on_change(&mut self, event: &ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: FnMut(&ChangeEvent),
{
    fn on_change(&mut self, event: &ChangeEvent) {
        self(event)
    }
}
