// Provisioning - fetch a worker's source before it can be constructed

pub mod progress;

pub use progress::CloneProgress;

use crate::domain::{ClientMessage, ProvisioningSpec, SimulationId};
use crate::port::{FetchError, MessagingGroups, SourceFetcher};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{error, info, warn};

/// One fetch of one simulation's source
///
/// Consumed by `run`; never retried.
pub struct ProvisioningTask {
    id: SimulationId,
    spec: ProvisioningSpec,
    fetcher: Arc<dyn SourceFetcher>,
    groups: Arc<dyn MessagingGroups>,
}

impl ProvisioningTask {
    pub fn new(
        id: SimulationId,
        spec: ProvisioningSpec,
        fetcher: Arc<dyn SourceFetcher>,
        groups: Arc<dyn MessagingGroups>,
    ) -> Self {
        Self {
            id,
            spec,
            fetcher,
            groups,
        }
    }

    /// Fetch the source, streaming progress to the simulation's group
    pub async fn run(self) -> Result<(), FetchError> {
        info!(
            sim_id = %self.id,
            url = %self.spec.source_url(),
            branch = %self.spec.branch(),
            target_dir = %self.spec.target_dir().display(),
            "Cloning repository"
        );

        let progress = CloneProgress::new(self.id.clone(), Arc::clone(&self.groups));

        match self.fetcher.fetch(&self.spec, &progress).await {
            Ok(()) => {
                info!(sim_id = %self.id, "Completed cloning");
                Ok(())
            }
            Err(e) => {
                error!(sim_id = %self.id, error = %e, "Failed to clone repository");
                Err(e)
            }
        }
    }
}

/// Publish to a simulation's group; failures are logged and dropped
pub(crate) fn publish_or_warn(
    groups: &dyn MessagingGroups,
    id: &SimulationId,
    message: ClientMessage,
) {
    let action = message.action();
    if let Err(e) = groups.publish(&id.topic(), message) {
        warn!(sim_id = %id, action = %action, error = %e, "Failed to publish message");
    }
}

/// Publish an error block followed by CLOSE_INFO_LOG
pub(crate) fn report_failure(
    groups: &dyn MessagingGroups,
    id: &SimulationId,
    header: &str,
    detail: &dyn Display,
) {
    publish_or_warn(
        groups,
        id,
        ClientMessage::InfoLog(format!("{}\n{}", header, detail)),
    );
    publish_or_warn(groups, id, ClientMessage::CloseInfoLog);
}
