use tracing::{trace, warn};

use crate::delta::Delta;
use crate::error::DeltaRejection;

/// Counters for everything a session did with the deltas it received.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaStats {
    pub applied: u64,
    pub buffered: u64,
    /// Buffered deltas accepted while draining after a snapshot landed.
    pub replayed: u64,
    pub dropped_idle: u64,
    pub discarded_fetches: u64,
    pub stale: u64,
    pub unknown_update: u64,
    pub unknown_delete: u64,
    pub duplicate_id: u64,
    pub identity_mismatch: u64,
}

impl DeltaStats {
    pub fn rejected(&self) -> u64 {
        self.stale
            + self.unknown_update
            + self.unknown_delete
            + self.duplicate_id
            + self.identity_mismatch
    }

    pub(crate) fn record_rejection(
        &mut self,
        delta: &Delta,
        rejection: &DeltaRejection,
        verbose: bool,
    ) {
        let counter = match rejection {
            DeltaRejection::StaleDeltaIgnored { .. } => &mut self.stale,
            DeltaRejection::UnknownItemUpdate { .. } => &mut self.unknown_update,
            DeltaRejection::UnknownItemDelete { .. } => &mut self.unknown_delete,
            DeltaRejection::DuplicateIdConflict { .. } => &mut self.duplicate_id,
            DeltaRejection::IdentityMismatch { .. } => &mut self.identity_mismatch,
        };
        *counter += 1;

        if verbose {
            warn!(
                kind = ?delta.kind,
                id = %delta.id,
                version = delta.version,
                parent = ?delta.parent_id,
                client_key = ?delta.client_key,
                attributes = ?delta.attributes,
                "delta rejected: {rejection}"
            );
        } else {
            trace!(id = %delta.id, "delta rejected: {rejection}");
        }
    }
}
