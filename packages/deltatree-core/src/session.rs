use std::cell::RefCell;

use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::delta::Delta;
use crate::diagnostics::DeltaStats;
use crate::error::{DeltaRejection, Error, Result};
use crate::events::{ChangeEvent, ChangeListener};
use crate::ids::NodeId;
use crate::item::VersionedItem;
use crate::mirror::Mirror;
use crate::pending::PendingBuffer;
use crate::reader::TreeReader;
use crate::traits::{BulkFetch, PushChannel};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState {
    /// Not watching; deltas are dropped.
    Idle,
    /// Subscription open, snapshot in flight; deltas are buffered.
    Loading,
    /// Snapshot applied; deltas go straight to the mirror.
    Live,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchScope {
    pub root_id: NodeId,
    pub state: WatchState,
}

/// Identifies one bulk fetch issued by [`WatchSession::start`]. A response is only applied if
/// its ticket is from the current epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    root: NodeId,
    epoch: u64,
}

impl FetchTicket {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// What happened to one delta handed to [`WatchSession::on_delta`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied,
    Buffered,
    Rejected(DeltaRejection),
    /// The session was idle.
    Dropped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    /// Buffered deltas accepted after the snapshot.
    pub replayed: usize,
    /// Buffered deltas the snapshot had already superseded (or that were otherwise rejected).
    pub replay_rejected: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(LoadSummary),
    /// The response belonged to a stopped or restarted session and was ignored.
    Discarded,
}

/// Lifecycle of one mirrored watch root.
///
/// ```text
///            start(root)                 complete_fetch(Ok)
///   Idle ───────────────────▶ Loading ─────────────────────▶ Live
///    ▲                         │  ▲  complete_fetch(Err)      │
///    │          stop()         │  └──── stays Loading         │ start(same root)
///    └─────────────────────────┴──────────────────────────────┘ = forced re-sync
/// ```
///
/// The subscription opens before the snapshot is requested, so nothing that happens after
/// the request is lost. Deltas arriving while Loading are buffered and replayed on top of
/// the snapshot.
pub struct WatchSession<P: PushChannel> {
    config: SessionConfig,
    channel: P,
    state: WatchState,
    root: Option<NodeId>,
    epoch: u64,
    mirror: Option<Mirror>,
    pending: PendingBuffer,
    listeners: Vec<Box<dyn ChangeListener>>,
    stats: DeltaStats,
}

impl<P: PushChannel> WatchSession<P> {
    pub fn new(config: SessionConfig, channel: P) -> Self {
        Self {
            config,
            channel,
            state: WatchState::Idle,
            root: None,
            epoch: 0,
            mirror: None,
            pending: PendingBuffer::new(),
            listeners: Vec::new(),
            stats: DeltaStats::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn channel(&self) -> &P {
        &self.channel
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// The root most recently passed to `start`, with the current state.
    pub fn scope(&self) -> Option<WatchScope> {
        self.root.map(|root_id| WatchScope {
            root_id,
            state: self.state,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn stats(&self) -> &DeltaStats {
        &self.stats
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn mirror(&self) -> Option<&Mirror> {
        self.mirror.as_ref()
    }

    /// Read access for consumers. `None` until the first `start`.
    ///
    /// The last mirrored state stays readable after `stop`.
    pub fn reader(&self) -> Option<TreeReader<'_>> {
        self.mirror.as_ref().map(Mirror::reader)
    }

    pub fn subscribe_changes(&mut self, listener: impl ChangeListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Begin (or restart) watching `root` and return the ticket for the bulk fetch the caller
    /// must now issue.
    ///
    /// On the root already being watched this does not resubscribe. While Loading it is a
    /// retry that keeps the buffered deltas. While Live it is a forced re-sync.
    pub fn start(&mut self, root: Option<NodeId>) -> Result<FetchTicket> {
        let root = root.ok_or(Error::MissingWatchRoot)?;

        match (self.state, self.root) {
            (WatchState::Loading, Some(current)) if current == root => {
                info!(root = %root, buffered = self.pending.len(), "retrying snapshot");
            }
            (WatchState::Live, Some(current)) if current == root => {
                info!(root = %root, "forced re-sync");
                self.state = WatchState::Loading;
            }
            _ => {
                self.stop();
                let topic = self.config.topic_prefix(root);
                self.channel.subscribe(&topic)?;
                self.root = Some(root);

                let mirror = self.mirror.get_or_insert_with(|| Mirror::new(root));
                let events = if mirror.root() == root {
                    Vec::new()
                } else {
                    mirror.retarget(root)
                };
                self.publish(&events);
                self.state = WatchState::Loading;
                info!(root = %root, topic = %topic, "watch started");
            }
        }

        self.epoch += 1;
        Ok(FetchTicket {
            root,
            epoch: self.epoch,
        })
    }

    /// Route one delta from the push channel according to the current state.
    ///
    /// Rejections are counted and logged here and never surface as errors.
    pub fn on_delta(&mut self, delta: Delta) -> DeltaOutcome {
        match self.state {
            WatchState::Idle => {
                self.stats.dropped_idle += 1;
                trace!(id = %delta.id, "dropping delta while idle");
                DeltaOutcome::Dropped
            }
            WatchState::Loading => {
                self.pending.push(delta);
                self.stats.buffered += 1;
                DeltaOutcome::Buffered
            }
            WatchState::Live => self.apply(&delta),
        }
    }

    /// Hand the bulk fetch response for `ticket` back to the session.
    ///
    /// A stale ticket is discarded. On failure the session stays Loading and the error is
    /// returned; retrying is up to the caller. On success the snapshot replaces the store,
    /// the buffered deltas are replayed in receipt order, and the session goes Live.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        fetched: Result<Vec<VersionedItem>>,
    ) -> Result<LoadOutcome> {
        if ticket.epoch != self.epoch
            || self.state != WatchState::Loading
            || self.root != Some(ticket.root)
        {
            self.stats.discarded_fetches += 1;
            debug!(
                root = %ticket.root,
                ticket_epoch = ticket.epoch,
                epoch = self.epoch,
                state = ?self.state,
                "discarding stale snapshot"
            );
            return Ok(LoadOutcome::Discarded);
        }

        let items = match fetched {
            Ok(items) => items,
            Err(err) => {
                let err = match err {
                    err @ Error::BulkFetch(_) => err,
                    other => Error::BulkFetch(other.to_string()),
                };
                warn!(root = %ticket.root, "{err}; session stays loading");
                return Err(err);
            }
        };

        let Some(mirror) = self.mirror.as_mut() else {
            return Err(Error::InconsistentState(
                "loading session has no mirror".into(),
            ));
        };
        let (changes, events) = mirror.load_snapshot(items);
        self.publish(&events);

        let mut summary = LoadSummary {
            added: changes.added.len(),
            changed: changes.changed.len(),
            removed: changes.removed.len(),
            ..LoadSummary::default()
        };
        let buffered = self.pending.drain();
        debug!(count = buffered.len(), "replaying buffered deltas");
        for delta in &buffered {
            match self.apply(delta) {
                DeltaOutcome::Applied => {
                    summary.replayed += 1;
                    self.stats.replayed += 1;
                }
                DeltaOutcome::Rejected(_) => summary.replay_rejected += 1,
                DeltaOutcome::Buffered | DeltaOutcome::Dropped => {}
            }
        }

        self.state = WatchState::Live;
        info!(
            root = %ticket.root,
            added = summary.added,
            changed = summary.changed,
            removed = summary.removed,
            replayed = summary.replayed,
            replay_rejected = summary.replay_rejected,
            "watch is live"
        );
        Ok(LoadOutcome::Loaded(summary))
    }

    /// Close the subscription and forget buffered deltas. Safe in any state, including with
    /// a fetch outstanding: its response will be discarded.
    pub fn stop(&mut self) {
        if self.state == WatchState::Idle {
            return;
        }
        if let Some(root) = self.root {
            self.channel.unsubscribe(&self.config.topic_prefix(root));
        }
        let discarded = self.pending.len();
        self.pending.clear();
        self.epoch += 1;
        self.state = WatchState::Idle;
        info!(root = ?self.root, discarded, "watch stopped");
    }

    fn apply(&mut self, delta: &Delta) -> DeltaOutcome {
        let Some(mirror) = self.mirror.as_mut() else {
            return DeltaOutcome::Dropped;
        };
        match mirror.apply_delta(delta) {
            Ok(events) => {
                self.stats.applied += 1;
                self.publish(&events);
                DeltaOutcome::Applied
            }
            Err(rejection) => {
                self.stats
                    .record_rejection(delta, &rejection, self.config.verbose_diagnostics);
                DeltaOutcome::Rejected(rejection)
            }
        }
    }

    fn publish(&mut self, events: &[ChangeEvent]) {
        for event in events {
            for listener in &mut self.listeners {
                listener.on_change(event);
            }
        }
    }
}

/// Start watching `root` and drive the bulk fetch to completion.
///
/// The session is only borrowed around `start` and `complete_fetch`, never across the
/// await, so the environment can keep delivering deltas while the fetch is in flight.
pub async fn start_watch<P, F>(
    session: &RefCell<WatchSession<P>>,
    root: Option<NodeId>,
    fetcher: &F,
) -> Result<LoadOutcome>
where
    P: PushChannel,
    F: BulkFetch + ?Sized,
{
    let ticket = session.borrow_mut().start(root)?;
    let fetched = fetcher.fetch(ticket.root()).await;
    session.borrow_mut().complete_fetch(ticket, fetched)
}
