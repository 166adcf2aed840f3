#![forbid(unsafe_code)]
//! Client-side mirror of a server-owned hierarchical collection.
//!
//! A [`WatchSession`] combines a bulk snapshot of everything under a watched root with a
//! stream of versioned, possibly duplicated or reordered deltas. It keeps a flat
//! [`ItemStore`] and a derived [`TreeIndex`] consistent with each other. Consumers only ever
//! see the read-only [`TreeReader`] and the [`ChangeEvent`] stream.

pub mod config;
pub mod delta;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod ids;
pub mod item;
pub mod mirror;
pub mod pending;
pub mod reader;
pub mod session;
pub mod store;
pub mod traits;
pub mod tree;

pub use config::SessionConfig;
pub use delta::{Delta, DeltaKind};
pub use diagnostics::DeltaStats;
pub use error::{DeltaRejection, Error, Result};
pub use events::{ChangeEvent, ChangeListener};
pub use ids::{ClientKey, NodeId, Version};
pub use item::{Attributes, VersionedItem};
pub use mirror::Mirror;
pub use pending::PendingBuffer;
pub use reader::{NodeView, TreeReader};
pub use session::{
    start_watch, DeltaOutcome, FetchTicket, LoadOutcome, LoadSummary, WatchScope, WatchSession,
    WatchState,
};
pub use store::{BulkChanges, ItemStore, StoreEvent};
pub use traits::{BulkFetch, PushChannel};
pub use tree::{NodeState, TreeIndex, TreeNode};
