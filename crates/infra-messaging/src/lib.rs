// SimRunner Infrastructure - Messaging Adapter
// Implements: MessagingGroups (in-process broadcast channels)

pub mod broadcast_groups;

pub use broadcast_groups::{BroadcastGroups, DEFAULT_GROUP_CAPACITY};
