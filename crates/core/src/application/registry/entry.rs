// Registry entries

use crate::domain::InstanceState;
use crate::port::WorkerHandle;
use std::sync::Arc;

/// Progress of a reserved id that has no handle yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PlaceholderState {
    Provisioning,
    Failed,
}

/// What the registry holds for one id
#[derive(Clone)]
pub(super) enum RegistryEntry {
    /// Id reserved by `spawn_from_branch`; `reservation` identifies that call
    Placeholder {
        reservation: u64,
        state: PlaceholderState,
        registered_at: i64,
    },
    Live {
        handle: Arc<dyn WorkerHandle>,
        registered_at: i64,
    },
}

impl RegistryEntry {
    pub(super) fn placeholder(reservation: u64, registered_at: i64) -> Self {
        RegistryEntry::Placeholder {
            reservation,
            state: PlaceholderState::Provisioning,
            registered_at,
        }
    }

    pub(super) fn live(handle: Arc<dyn WorkerHandle>, registered_at: i64) -> Self {
        RegistryEntry::Live {
            handle,
            registered_at,
        }
    }

    pub(super) fn registered_at(&self) -> i64 {
        match self {
            RegistryEntry::Placeholder { registered_at, .. }
            | RegistryEntry::Live { registered_at, .. } => *registered_at,
        }
    }

    /// True only for the placeholder created by that reservation
    pub(super) fn holds_reservation(&self, token: u64) -> bool {
        matches!(self, RegistryEntry::Placeholder { reservation, .. } if *reservation == token)
    }

    pub(super) fn mark_failed(&mut self) {
        if let RegistryEntry::Placeholder { state, .. } = self {
            *state = PlaceholderState::Failed;
        }
    }

    /// Replace this entry with a live handle, keeping the registration time
    pub(super) fn install(&mut self, handle: Arc<dyn WorkerHandle>) {
        *self = RegistryEntry::live(handle, self.registered_at());
    }

    pub(super) fn into_handle(self) -> Option<Arc<dyn WorkerHandle>> {
        match self {
            RegistryEntry::Live { handle, .. } => Some(handle),
            RegistryEntry::Placeholder { .. } => None,
        }
    }

    /// Lifecycle state. Calls into the handle, so never call it under the registry lock.
    pub(super) fn state(&self) -> InstanceState {
        match self {
            RegistryEntry::Placeholder {
                state: PlaceholderState::Provisioning,
                ..
            } => InstanceState::Provisioning,
            RegistryEntry::Placeholder {
                state: PlaceholderState::Failed,
                ..
            } => InstanceState::ProvisioningFailed,
            RegistryEntry::Live { handle, .. } if handle.is_closed() => InstanceState::Closed,
            RegistryEntry::Live { .. } => InstanceState::Running,
        }
    }
}
