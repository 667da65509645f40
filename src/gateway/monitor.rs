use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// Answers whether a topic is flagged for traffic monitoring.
pub trait MonitoredTopics: Send + Sync {
    fn is_monitored(&self, topic: &str) -> bool;
}

/// Alias a monitored topic's publishers are redirected to.
pub fn monitored_alias(prefix: &str, topic: &str) -> String {
    format!("{prefix}{topic}")
}

/// Shared, lock-protected set of monitored topics.
///
/// Clones share the same set: the gateway reads it while an administrative
/// path adds and removes topics.
#[derive(Debug, Clone, Default)]
pub struct MonitorSet {
    topics: Arc<RwLock<HashSet<String>>>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the topic was not monitored before.
    pub fn insert(&self, topic: impl Into<String>) -> bool {
        let mut topics = self.write();
        let topic = topic.into();
        info!(%topic, "Monitoring topic");
        topics.insert(topic)
    }

    /// Returns true if the topic was monitored.
    pub fn remove(&self, topic: &str) -> bool {
        info!(topic, "No longer monitoring topic");
        self.write().remove(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.read().contains(topic)
    }

    /// Monitored topics in lexical order.
    pub fn topics(&self) -> Vec<String> {
        let sorted: BTreeSet<String> = self.read().iter().cloned().collect();
        sorted.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A writer that panicked leaves the set itself intact, so a poisoned lock is
// recovered rather than treated as empty.
impl MonitorSet {
    fn read(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.topics.read().unwrap_or_else(|poisoned| {
            warn!("Monitor set lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        self.topics.write().unwrap_or_else(|poisoned| {
            warn!("Monitor set lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl<S: Into<String>> FromIterator<S> for MonitorSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let topics = iter.into_iter().map(Into::into).collect();
        Self {
            topics: Arc::new(RwLock::new(topics)),
        }
    }
}

impl MonitoredTopics for MonitorSet {
    fn is_monitored(&self, topic: &str) -> bool {
        self.contains(topic)
    }
}
