#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

pub const DEFAULT_TOPIC_NAMESPACE: &str = "items";

/// Knobs for a [`WatchSession`](crate::WatchSession). None of them change behavior except the
/// topic the session subscribes to.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SessionConfig {
    /// Log rejected and stale deltas with their full contents at `warn` instead of a one-line
    /// `trace`.
    pub verbose_diagnostics: bool,
    /// Prefix of the push topics; a watch on root `r` subscribes to `"{namespace}/{r}"`.
    pub topic_namespace: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verbose_diagnostics: false,
            topic_namespace: DEFAULT_TOPIC_NAMESPACE.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose_diagnostics = verbose;
        self
    }

    pub fn with_topic_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.topic_namespace = namespace.into();
        self
    }

    pub fn topic_prefix(&self, root: NodeId) -> String {
        format!("{}/{}", self.topic_namespace, root.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_prefix_uses_namespace_and_raw_id() {
        let config = SessionConfig::default().with_topic_namespace("folders");
        assert_eq!(config.topic_prefix(NodeId(42)), "folders/42");
        assert_eq!(SessionConfig::default().topic_prefix(NodeId(1)), "items/1");
    }
}
