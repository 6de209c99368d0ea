// Messaging Group Port
// Topic-addressed pub/sub used to stream status messages to subscribers

use crate::domain::ClientMessage;
use thiserror::Error;
use tokio::sync::broadcast;

/// Receiving end of a group subscription
pub type GroupReceiver = broadcast::Receiver<ClientMessage>;

/// Messaging errors (never fatal to the registry)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Messaging service unavailable: {0}")]
    Unavailable(String),
}

/// Messaging group service
///
/// Delivery is best-effort: publishing to a group nobody listens to is not
/// an error.
pub trait MessagingGroups: Send + Sync {
    /// Create a group. Creating an existing group is a no-op.
    fn create(&self, topic: &str) -> Result<(), MessagingError>;

    /// Publish a message to every current subscriber of a group
    fn publish(&self, topic: &str, message: ClientMessage) -> Result<(), MessagingError>;

    /// Close a group, ending its subscriptions. Closing an unknown group is a no-op.
    fn close(&self, topic: &str) -> Result<(), MessagingError>;

    /// Subscribe to an existing group
    fn subscribe(&self, topic: &str) -> Result<GroupReceiver, MessagingError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Everything that happened to the mock, in order
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum GroupEvent {
        Created(String),
        Published(String, ClientMessage),
        Closed(String),
    }

    /// Messaging mock that records every call
    ///
    /// Also keeps real broadcast channels so subscriptions work.
    pub struct RecordingGroups {
        events: Mutex<Vec<GroupEvent>>,
        groups: Mutex<HashMap<String, broadcast::Sender<ClientMessage>>>,
        failing: AtomicBool,
    }

    impl Default for RecordingGroups {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RecordingGroups {
        pub fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                groups: Mutex::new(HashMap::new()),
                failing: AtomicBool::new(false),
            }
        }

        /// Make every subsequent call fail (calls are still recorded)
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn events(&self) -> Vec<GroupEvent> {
            self.events.lock().unwrap().clone()
        }

        /// Messages published to one topic, in order
        pub fn published(&self, topic: &str) -> Vec<ClientMessage> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    GroupEvent::Published(t, m) if t == topic => Some(m),
                    _ => None,
                })
                .collect()
        }

        pub fn is_open(&self, topic: &str) -> bool {
            self.groups.lock().unwrap().contains_key(topic)
        }

        pub fn was_closed(&self, topic: &str) -> bool {
            self.events()
                .iter()
                .any(|e| matches!(e, GroupEvent::Closed(t) if t == topic))
        }

        fn record(&self, event: GroupEvent) -> Result<(), MessagingError> {
            self.events.lock().unwrap().push(event);
            if self.failing.load(Ordering::SeqCst) {
                return Err(MessagingError::Unavailable("mock failure".to_string()));
            }
            Ok(())
        }
    }

    impl MessagingGroups for RecordingGroups {
        fn create(&self, topic: &str) -> Result<(), MessagingError> {
            self.record(GroupEvent::Created(topic.to_string()))?;
            self.groups
                .lock()
                .unwrap()
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(64).0);
            Ok(())
        }

        fn publish(&self, topic: &str, message: ClientMessage) -> Result<(), MessagingError> {
            self.record(GroupEvent::Published(topic.to_string(), message.clone()))?;
            let groups = self.groups.lock().unwrap();
            let tx = groups
                .get(topic)
                .ok_or_else(|| MessagingError::UnknownGroup(topic.to_string()))?;
            let _ = tx.send(message);
            Ok(())
        }

        fn close(&self, topic: &str) -> Result<(), MessagingError> {
            self.record(GroupEvent::Closed(topic.to_string()))?;
            self.groups.lock().unwrap().remove(topic);
            Ok(())
        }

        fn subscribe(&self, topic: &str) -> Result<GroupReceiver, MessagingError> {
            self.groups
                .lock()
                .unwrap()
                .get(topic)
                .map(|tx| tx.subscribe())
                .ok_or_else(|| MessagingError::UnknownGroup(topic.to_string()))
        }
    }
}
