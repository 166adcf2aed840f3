//! Shared fixtures for exercising watch sessions without a real transport.
//!
//! - [`RecordingChannel`] records subscribe/unsubscribe calls and can fail on demand.
//! - [`ScriptedFetch`] answers bulk fetches from a queue of canned responses.
//! - [`DeferredFetch`] parks each fetch until a test resolves it, so deltas can be
//!   delivered while the snapshot is in flight.
//! - [`RecordingListener`] collects change events.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use async_trait::async_trait;
use deltatree_core::{
    BulkFetch, ChangeEvent, Error, NodeId, PushChannel, Result, VersionedItem,
};
use futures::channel::oneshot;

pub fn id(n: u64) -> NodeId {
    NodeId(n)
}

pub fn item(id: u64, parent: Option<u64>, version: u64) -> VersionedItem {
    VersionedItem::new(NodeId(id), parent.map(NodeId), version)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelCall {
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Debug, Default)]
pub struct RecordingChannel {
    active: Vec<String>,
    calls: Vec<ChannelCall>,
    fail_next: Option<String>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel whose next `subscribe` fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_next: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    pub fn calls(&self) -> &[ChannelCall] {
        &self.calls
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.active.iter().any(|t| t == topic)
    }
}

impl PushChannel for RecordingChannel {
    fn subscribe(&mut self, topic_prefix: &str) -> Result<()> {
        self.calls
            .push(ChannelCall::Subscribe(topic_prefix.to_string()));
        if let Some(message) = self.fail_next.take() {
            return Err(Error::Subscription(message));
        }
        self.active.push(topic_prefix.to_string());
        Ok(())
    }

    fn unsubscribe(&mut self, topic_prefix: &str) {
        self.calls
            .push(ChannelCall::Unsubscribe(topic_prefix.to_string()));
        self.active.retain(|t| t != topic_prefix);
    }
}

/// Answers each fetch with the next queued response.
#[derive(Debug, Default)]
pub struct ScriptedFetch {
    responses: RefCell<VecDeque<Result<Vec<VersionedItem>>>>,
    requested: RefCell<Vec<NodeId>>,
}

impl ScriptedFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returning(items: Vec<VersionedItem>) -> Self {
        let fetch = Self::new();
        fetch.push_ok(items);
        fetch
    }

    pub fn push_ok(&self, items: Vec<VersionedItem>) {
        self.responses.borrow_mut().push_back(Ok(items));
    }

    pub fn push_err(&self, message: impl Into<String>) {
        self.responses
            .borrow_mut()
            .push_back(Err(Error::BulkFetch(message.into())));
    }

    pub fn requested(&self) -> Vec<NodeId> {
        self.requested.borrow().clone()
    }
}

#[async_trait(?Send)]
impl BulkFetch for ScriptedFetch {
    async fn fetch(&self, root: NodeId) -> Result<Vec<VersionedItem>> {
        self.requested.borrow_mut().push(root);
        let next = self.responses.borrow_mut().pop_front();
        next.unwrap_or_else(|| Err(Error::BulkFetch("no scripted response".into())))
    }
}

type Waiting = Rc<RefCell<VecDeque<oneshot::Sender<Result<Vec<VersionedItem>>>>>>;

/// Parks every fetch until [`FetchResolver`] answers it, oldest first.
#[derive(Debug, Default)]
pub struct DeferredFetch {
    waiting: Waiting,
}

impl DeferredFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolver(&self) -> FetchResolver {
        FetchResolver {
            waiting: Rc::clone(&self.waiting),
        }
    }
}

#[async_trait(?Send)]
impl BulkFetch for DeferredFetch {
    async fn fetch(&self, _root: NodeId) -> Result<Vec<VersionedItem>> {
        let (tx, rx) = oneshot::channel();
        self.waiting.borrow_mut().push_back(tx);
        rx.await
            .unwrap_or_else(|_| Err(Error::BulkFetch("fetch abandoned".into())))
    }
}

#[derive(Clone, Debug)]
pub struct FetchResolver {
    waiting: Waiting,
}

impl FetchResolver {
    pub fn outstanding(&self) -> usize {
        self.waiting.borrow().len()
    }

    /// Answer the oldest outstanding fetch. Returns `false` if none was waiting.
    pub fn resolve(&self, items: Vec<VersionedItem>) -> bool {
        self.send(Ok(items))
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.send(Err(Error::BulkFetch(message.into())))
    }

    fn send(&self, response: Result<Vec<VersionedItem>>) -> bool {
        let next = self.waiting.borrow_mut().pop_front();
        match next {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

/// Collects change events; hand [`RecordingListener::sink`] to the session.
#[derive(Clone, Debug, Default)]
pub struct RecordingListener {
    events: Rc<RefCell<Vec<ChangeEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> impl FnMut(&ChangeEvent) + 'static {
        let events = Rc::clone(&self.events);
        move |event: &ChangeEvent| events.borrow_mut().push(event.clone())
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.borrow().clone()
    }

    /// Drain what has been recorded so far.
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn removed_ids(&self) -> Vec<NodeId> {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, ChangeEvent::Removed { .. }))
            .map(ChangeEvent::id)
            .collect()
    }
}
