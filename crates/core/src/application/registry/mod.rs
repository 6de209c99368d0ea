// Instance Registry - tracks every simulation worker by id

pub mod config;
pub mod constants;
mod entry;

pub use config::{ProvisioningFailurePolicy, RegistryConfig};

use constants::{CLONE_ERROR_HEADER, SPAWN_ERROR_HEADER};
use entry::RegistryEntry;

use crate::application::provisioning::{publish_or_warn, report_failure, ProvisioningTask};
use crate::domain::{ClientMessage, InstanceStatus, ProvisioningSpec, SimulationId, WorkerMessage};
use crate::error::{AppError, Result};
use crate::port::{MessagingGroups, SourceFetcher, TimeProvider, WorkerFactory, WorkerHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Concurrent registry of simulation workers
///
/// An id is active iff it has an entry. The lock guards the map only: worker
/// construction, `close`, `send` and `is_closed` always run after it is
/// released, so a slow worker never stalls operations on other ids.
pub struct InstanceRegistry {
    entries: Mutex<HashMap<SimulationId, RegistryEntry>>,
    groups: Arc<dyn MessagingGroups>,
    fetcher: Arc<dyn SourceFetcher>,
    time_provider: Arc<dyn TimeProvider>,
    config: RegistryConfig,
    next_reservation: AtomicU64,
}

impl InstanceRegistry {
    pub fn new(
        groups: Arc<dyn MessagingGroups>,
        fetcher: Arc<dyn SourceFetcher>,
        time_provider: Arc<dyn TimeProvider>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            groups,
            fetcher,
            time_provider,
            config,
            next_reservation: AtomicU64::new(1),
        }
    }

    /// The map stays structurally valid even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, HashMap<SimulationId, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Construct a worker and register it, creating its messaging group first
    pub async fn spawn(&self, id: &SimulationId, factory: &dyn WorkerFactory) -> Result<()> {
        self.spawn_with(id, factory, true).await
    }

    /// Construct a worker and register it under `id`
    ///
    /// # Errors
    /// - AppError::Worker if construction fails; nothing is registered then
    pub async fn spawn_with(
        &self,
        id: &SimulationId,
        factory: &dyn WorkerFactory,
        create_group: bool,
    ) -> Result<()> {
        if create_group {
            self.create_group(id);
        }

        let handle: Arc<dyn WorkerHandle> = Arc::from(factory.construct().await?);
        let entry = RegistryEntry::live(handle, self.time_provider.now_millis());

        let displaced = self.lock().insert(id.clone(), entry);

        if let Some(old) = displaced.and_then(RegistryEntry::into_handle) {
            self.close_displaced(id, old).await;
        }

        info!(sim_id = %id, "Simulation spawned");
        Ok(())
    }

    /// Reserve `id`, then fetch its source and construct the worker in the background
    ///
    /// `is_running(id)` is true as soon as this returns. Provisioning outcome
    /// is reported only through the id's messaging group. The returned handle
    /// may be dropped; the task keeps running.
    pub fn spawn_from_branch(
        self: &Arc<Self>,
        id: &SimulationId,
        spec: ProvisioningSpec,
        factory: Arc<dyn WorkerFactory>,
    ) -> JoinHandle<()> {
        self.create_group(id);

        let reservation = self.next_reservation.fetch_add(1, Ordering::Relaxed);
        let placeholder = RegistryEntry::placeholder(reservation, self.time_provider.now_millis());
        let displaced = self.lock().insert(id.clone(), placeholder);

        self.start_provisioning(id, reservation, displaced, spec, factory)
    }

    /// Like `spawn_from_branch`, but refuses an id that is running
    ///
    /// The check and the reservation happen under one lock, so concurrent
    /// callers for the same id get exactly one reservation. A worker that
    /// closed itself may be replaced.
    ///
    /// # Errors
    /// - AppError::AlreadyRunning if `id` has a placeholder or an open worker
    pub fn try_spawn_from_branch(
        self: &Arc<Self>,
        id: &SimulationId,
        spec: ProvisioningSpec,
        factory: Arc<dyn WorkerFactory>,
    ) -> Result<JoinHandle<()>> {
        let reservation = self.next_reservation.fetch_add(1, Ordering::Relaxed);

        let displaced = loop {
            let observed = {
                let mut entries = self.lock();
                match entries.get(id) {
                    None => {
                        let placeholder = RegistryEntry::placeholder(
                            reservation,
                            self.time_provider.now_millis(),
                        );
                        entries.insert(id.clone(), placeholder);
                        break None;
                    }
                    Some(RegistryEntry::Placeholder { .. }) => {
                        return Err(AppError::AlreadyRunning(id.clone()))
                    }
                    Some(RegistryEntry::Live { handle, .. }) => Arc::clone(handle),
                }
            };

            if !observed.is_closed() {
                return Err(AppError::AlreadyRunning(id.clone()));
            }

            // Replace the closed worker only if nobody swapped it meanwhile
            let mut entries = self.lock();
            let unchanged = matches!(
                entries.get(id),
                Some(RegistryEntry::Live { handle, .. }) if Arc::ptr_eq(handle, &observed)
            );
            if unchanged {
                let placeholder =
                    RegistryEntry::placeholder(reservation, self.time_provider.now_millis());
                break entries.insert(id.clone(), placeholder);
            }
        };

        self.create_group(id);
        Ok(self.start_provisioning(id, reservation, displaced, spec, factory))
    }

    fn start_provisioning(
        self: &Arc<Self>,
        id: &SimulationId,
        reservation: u64,
        displaced: Option<RegistryEntry>,
        spec: ProvisioningSpec,
        factory: Arc<dyn WorkerFactory>,
    ) -> JoinHandle<()> {
        info!(sim_id = %id, reservation = reservation, "Simulation reserved for provisioning");

        let registry = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            if let Some(old) = displaced.and_then(RegistryEntry::into_handle) {
                registry.close_displaced(&id, old).await;
            }
            registry.provision(id, reservation, spec, factory).await;
        })
    }

    async fn provision(
        &self,
        id: SimulationId,
        reservation: u64,
        spec: ProvisioningSpec,
        factory: Arc<dyn WorkerFactory>,
    ) {
        let task = ProvisioningTask::new(
            id.clone(),
            spec,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.groups),
        );

        if let Err(e) = task.run().await {
            if self.holds_reservation(&id, reservation) {
                report_failure(self.groups.as_ref(), &id, CLONE_ERROR_HEADER, &e);
                self.apply_failure_policy(&id, reservation);
            }
            return;
        }

        match self.install(&id, reservation, factory.as_ref()).await {
            Ok(true) => info!(sim_id = %id, "Simulation ready"),
            Ok(false) => {
                info!(sim_id = %id, "Simulation was killed during provisioning, discarding worker");
                return;
            }
            Err(e) => {
                error!(sim_id = %id, error = %e, "Failed to construct worker after cloning");
                if self.holds_reservation(&id, reservation) {
                    report_failure(self.groups.as_ref(), &id, SPAWN_ERROR_HEADER, &e);
                    self.apply_failure_policy(&id, reservation);
                }
                return;
            }
        }

        publish_or_warn(self.groups.as_ref(), &id, ClientMessage::CloseInfoLog);
    }

    /// Whether `id` still holds the placeholder of this reservation
    fn holds_reservation(&self, id: &SimulationId, reservation: u64) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|entry| entry.holds_reservation(reservation))
    }

    /// Swap the placeholder for a freshly built worker
    ///
    /// Returns false (and closes the new worker) when the placeholder is
    /// gone, so a killed id is never brought back.
    async fn install(
        &self,
        id: &SimulationId,
        reservation: u64,
        factory: &dyn WorkerFactory,
    ) -> Result<bool> {
        let handle: Arc<dyn WorkerHandle> = Arc::from(factory.construct().await?);

        let leftover = {
            let mut entries = self.lock();
            match entries.get_mut(id) {
                Some(entry) if entry.holds_reservation(reservation) => {
                    entry.install(handle);
                    None
                }
                _ => Some(handle),
            }
        };

        match leftover {
            None => Ok(true),
            Some(handle) => {
                if let Err(e) = handle.close().await {
                    warn!(sim_id = %id, error = %e, "Failed to close discarded worker");
                }
                Ok(false)
            }
        }
    }

    fn apply_failure_policy(&self, id: &SimulationId, reservation: u64) {
        match self.config.failure_policy {
            ProvisioningFailurePolicy::KeepPlaceholder => {
                if let Some(entry) = self.lock().get_mut(id) {
                    if entry.holds_reservation(reservation) {
                        entry.mark_failed();
                    }
                }
            }
            ProvisioningFailurePolicy::RemovePlaceholder => {
                let removed = {
                    let mut entries = self.lock();
                    if entries
                        .get(id)
                        .is_some_and(|e| e.holds_reservation(reservation))
                    {
                        entries.remove(id)
                    } else {
                        None
                    }
                };

                if removed.is_some() {
                    info!(sim_id = %id, "Removed placeholder after failed provisioning");
                    self.close_group(id);
                }
            }
        }
    }

    /// Remove `id`, stop its worker and close its messaging group
    ///
    /// Returns false if `id` was not registered. With `remove_only` the
    /// worker is dropped without calling `close`.
    pub async fn kill(&self, id: &SimulationId, remove_only: bool) -> bool {
        let entry = self.lock().remove(id);
        let Some(entry) = entry else {
            return false;
        };

        if let Some(handle) = entry.into_handle() {
            if !remove_only {
                info!(sim_id = %id, "Stopping simulation");
                if let Err(e) = handle.close().await {
                    warn!(sim_id = %id, error = %e, "Worker did not close cleanly");
                }
            }
        }

        self.close_group(id);
        true
    }

    /// Whether `id` is active
    ///
    /// A placeholder counts as running; a worker counts until it reports
    /// itself closed.
    pub fn is_running(&self, id: &SimulationId) -> bool {
        let handle = match self.lock().get(id) {
            None => return false,
            Some(RegistryEntry::Placeholder { .. }) => return true,
            Some(RegistryEntry::Live { handle, .. }) => Arc::clone(handle),
        };

        !handle.is_closed()
    }

    /// Deliver a message to the worker registered under `id`
    ///
    /// # Errors
    /// - AppError::NotFound if `id` is not registered
    /// - AppError::NotReady if `id` is still a placeholder
    /// - AppError::Worker if the worker rejects the message
    pub async fn send(&self, id: &SimulationId, message: WorkerMessage) -> Result<()> {
        let handle = self.live_handle(id)?;
        handle.send(message).await?;
        Ok(())
    }

    fn live_handle(&self, id: &SimulationId) -> Result<Arc<dyn WorkerHandle>> {
        let entries = self.lock();
        match entries.get(id) {
            None => Err(AppError::NotFound(id.clone())),
            Some(RegistryEntry::Placeholder { .. }) => Err(AppError::NotReady(id.clone())),
            Some(RegistryEntry::Live { handle, .. }) => Ok(Arc::clone(handle)),
        }
    }

    /// Status of every registered id, sorted by id
    pub fn snapshot(&self) -> Vec<InstanceStatus> {
        let entries: Vec<(SimulationId, RegistryEntry)> = self
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();

        let mut rows: Vec<InstanceStatus> = entries
            .into_iter()
            .map(|(id, entry)| InstanceStatus {
                id,
                state: entry.state(),
                registered_at: entry.registered_at(),
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Number of registered ids
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Kill every registered simulation, returning how many were removed
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<SimulationId> = self.lock().keys().cloned().collect();
        info!(count = ids.len(), "Stopping all simulations");

        futures::future::join_all(ids.iter().map(|id| self.kill(id, false)))
            .await
            .into_iter()
            .filter(|removed| *removed)
            .count()
    }

    async fn close_displaced(&self, id: &SimulationId, handle: Arc<dyn WorkerHandle>) {
        warn!(sim_id = %id, "Replacing a live worker, closing the old one");
        if let Err(e) = handle.close().await {
            warn!(sim_id = %id, error = %e, "Failed to close replaced worker");
        }
    }

    fn create_group(&self, id: &SimulationId) {
        if let Err(e) = self.groups.create(&id.topic()) {
            warn!(sim_id = %id, error = %e, "Failed to create messaging group");
        }
    }

    fn close_group(&self, id: &SimulationId) {
        if let Err(e) = self.groups.close(&id.topic()) {
            warn!(sim_id = %id, error = %e, "Failed to close messaging group");
        }
    }
}
