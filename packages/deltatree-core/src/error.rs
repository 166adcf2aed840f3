use thiserror::Error;

use crate::ids::{ClientKey, NodeId, Version};

pub type Result<T> = std::result::Result<T, Error>;

/// Session lifecycle failures. These are the only errors that cross the public interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("watch root is not set")]
    MissingWatchRoot,
    #[error("bulk fetch failed: {0}")]
    BulkFetch(String),
    #[error("subscription error: {0}")]
    Subscription(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}

/// Why a single delta was dropped.
///
/// Rejections are diagnostics: a session counts and logs them, and keeps applying the rest of
/// the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaRejection {
    #[error("stale delta for {id}: stored version {stored} >= incoming {incoming}")]
    StaleDeltaIgnored {
        id: NodeId,
        stored: Version,
        incoming: Version,
    },
    #[error("update for unknown item {id}")]
    UnknownItemUpdate { id: NodeId },
    #[error("delete for unknown item {id}")]
    UnknownItemDelete { id: NodeId },
    #[error("client key {key} matches {matches} stored items")]
    DuplicateIdConflict { key: ClientKey, matches: usize },
    #[error("identity mismatch: delta id {id} disagrees with stored item {existing}")]
    IdentityMismatch { id: NodeId, existing: NodeId },
}
