// Broadcast messaging groups
// reason: tokio broadcast gives every subscriber its own cursor over a bounded buffer
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

use simrunner_core::domain::ClientMessage;
use simrunner_core::port::{GroupReceiver, MessagingError, MessagingGroups};

/// Default per-group buffer (messages a slow subscriber may lag behind)
pub const DEFAULT_GROUP_CAPACITY: usize = 256;

/// In-process messaging groups backed by `tokio::sync::broadcast`
///
/// Closing a group drops its sender: subscribers still drain what was
/// already buffered, then see the stream end.
pub struct BroadcastGroups {
    groups: Mutex<HashMap<String, broadcast::Sender<ClientMessage>>>,
    capacity: usize,
}

impl Default for BroadcastGroups {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_CAPACITY)
    }
}

impl BroadcastGroups {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ClientMessage>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of open groups
    pub fn group_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of live subscriptions to a group (0 if unknown)
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl MessagingGroups for BroadcastGroups {
    fn create(&self, topic: &str) -> Result<(), MessagingError> {
        let mut groups = self.lock();
        if !groups.contains_key(topic) {
            let (tx, _rx) = broadcast::channel(self.capacity);
            groups.insert(topic.to_string(), tx);
            info!(topic = %topic, "Messaging group created");
        }
        Ok(())
    }

    fn publish(&self, topic: &str, message: ClientMessage) -> Result<(), MessagingError> {
        let tx = self
            .lock()
            .get(topic)
            .cloned()
            .ok_or_else(|| MessagingError::UnknownGroup(topic.to_string()))?;

        // No subscribers is not a failure
        if tx.send(message).is_err() {
            debug!(topic = %topic, "Published to a group with no subscribers");
        }
        Ok(())
    }

    fn close(&self, topic: &str) -> Result<(), MessagingError> {
        if self.lock().remove(topic).is_some() {
            info!(topic = %topic, "Messaging group closed");
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<GroupReceiver, MessagingError> {
        self.lock()
            .get(topic)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| MessagingError::UnknownGroup(topic.to_string()))
    }
}
