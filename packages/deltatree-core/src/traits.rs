use async_trait::async_trait;

use crate::error::Result;
use crate::ids::NodeId;
use crate::item::VersionedItem;

/// Push channel supplied by the environment. Delivery is ordered per topic; each delta
/// received on a subscribed topic is handed to [`WatchSession::on_delta`].
///
/// [`WatchSession::on_delta`]: crate::WatchSession::on_delta
pub trait PushChannel {
    fn subscribe(&mut self, topic_prefix: &str) -> Result<()>;
    fn unsubscribe(&mut self, topic_prefix: &str);
}

/// Full-state read of every item under a watch root.
///
/// Implementations should report transport failures as [`Error::BulkFetch`]; other errors
/// are wrapped into it.
///
/// [`Error::BulkFetch`]: crate::Error::BulkFetch
#[async_trait(?Send)]
pub trait BulkFetch {
    async fn fetch(&self, root: NodeId) -> Result<Vec<VersionedItem>>;
}
