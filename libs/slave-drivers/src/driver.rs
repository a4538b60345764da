use crate::bus::BusTransport;
use crate::key_states::KeyStateTable;
use crate::registry::{SlaveId, SLAVE_COUNT};

/// What a driver's update did with its one bus-operation budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateStatus {
    /// A transfer was scheduled on the bus.
    Transferred,
    /// The phase ran but determined no transfer is needed.
    NoTransfer,
    /// The driver has nothing to do (fully synced or slave absent).
    Idle,
}

/// State every driver may read or write during an update: the key-state
/// table (disjoint slots per module) and the per-slave connection flags.
#[derive(Clone, Debug)]
pub struct SharedBusState {
    pub key_states: KeyStateTable,
    connected: [bool; SLAVE_COUNT],
}

impl SharedBusState {
    pub const fn new() -> Self {
        Self {
            key_states: KeyStateTable::new(),
            connected: [false; SLAVE_COUNT],
        }
    }

    pub fn is_connected(&self, id: SlaveId) -> bool {
        self.connected[id as usize]
    }

    pub fn set_connected(&mut self, id: SlaveId, connected: bool) {
        self.connected[id as usize] = connected;
    }
}

impl Default for SharedBusState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative slave driver contract.
///
/// `update` examines the current phase, issues at most one asynchronous bus
/// operation and advances the phase. It must return promptly regardless of
/// bus latency — completion is never awaited here.
pub trait SlaveDriver {
    /// Reset to the entry phase and default shadow state.
    fn init(&mut self);

    /// Run one phase step.
    fn update<B: BusTransport>(&mut self, bus: &mut B, shared: &mut SharedBusState)
        -> UpdateStatus;
}
