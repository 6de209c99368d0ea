// Clone progress adapter
// Turns fetch progress lines into INFO_LOG messages on the simulation's group

use super::publish_or_warn;
use crate::domain::{ClientMessage, SimulationId};
use crate::port::{MessagingGroups, ProgressObserver};
use std::sync::{Arc, Mutex, PoisonError};

/// Progress observer bound to one simulation
///
/// Every callback publishes one message; nothing is deduplicated or
/// rate limited.
pub struct CloneProgress {
    id: SimulationId,
    groups: Arc<dyn MessagingGroups>,
    current_line: Mutex<String>,
}

impl CloneProgress {
    pub fn new(id: SimulationId, groups: Arc<dyn MessagingGroups>) -> Self {
        Self {
            id,
            groups,
            current_line: Mutex::new(String::new()),
        }
    }

    /// Most recent progress line
    pub fn current_line(&self) -> String {
        self.current_line
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressObserver for CloneProgress {
    fn on_progress(&self, line: &str) {
        {
            let mut current = self
                .current_line
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            current.clear();
            current.push_str(line);
        }

        publish_or_warn(
            self.groups.as_ref(),
            &self.id,
            ClientMessage::info_log(line),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::messaging::mocks::RecordingGroups;

    #[test]
    fn test_every_callback_publishes_verbatim() {
        let groups = Arc::new(RecordingGroups::new());
        let id = SimulationId::new("sim-p").unwrap();
        groups.create(&id.topic()).unwrap();

        let progress = CloneProgress::new(id.clone(), groups.clone());
        progress.on_progress("Receiving objects:  10% (1/10)");
        progress.on_progress("Receiving objects:  10% (1/10)");
        progress.on_progress("Resolving deltas: 100% (4/4), done.");

        let published = groups.published(&id.topic());
        assert_eq!(
            published,
            vec![
                ClientMessage::info_log("Receiving objects:  10% (1/10)"),
                ClientMessage::info_log("Receiving objects:  10% (1/10)"),
                ClientMessage::info_log("Resolving deltas: 100% (4/4), done."),
            ]
        );
        assert_eq!(progress.current_line(), "Resolving deltas: 100% (4/4), done.");
    }

    #[test]
    fn test_publish_failure_is_swallowed() {
        let groups = Arc::new(RecordingGroups::new());
        groups.set_failing(true);

        let progress = CloneProgress::new(SimulationId::new("sim-q").unwrap(), groups.clone());
        progress.on_progress("Cloning into 'x'...");

        assert_eq!(progress.current_line(), "Cloning into 'x'...");
        assert_eq!(groups.events().len(), 1);
    }
}
