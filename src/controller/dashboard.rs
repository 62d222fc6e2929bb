//! Read-only session view for a reporting surface.
//!
//! The controller publishes into a shared snapshot; readers hold a
//! [`DashboardHandle`]. The only thing a handle can send back is an
//! evolution request, which travels over a channel of capacity one so
//! repeated requests coalesce and the controller consumes them at its own
//! pace.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::records::Provenance;
use crate::core::sensors::SensorSet;
use crate::core::state::LoopState;

/// Instructions kept in the dashboard history.
pub const INSTRUCTION_HISTORY: usize = 10;

/// A hardware-change instruction as shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstructionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub instruction: String,
    pub cycle: u64,
    pub sensors: SensorSet,
    pub provenance: Provenance,
    pub completed: bool,
}

/// Everything a reader can see.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub state: LoopState,
    pub cycle: u64,
    pub current_instruction: Option<InstructionSnapshot>,
    /// Oldest first.
    pub history: VecDeque<InstructionSnapshot>,
    pub firmware_version: u64,
    pub firmware_source: Option<String>,
}

type Shared = Arc<RwLock<DashboardSnapshot>>;

fn read(shared: &Shared) -> RwLockReadGuard<'_, DashboardSnapshot> {
    shared.read().unwrap_or_else(|poisoned| {
        tracing::warn!("dashboard read lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write(shared: &Shared) -> RwLockWriteGuard<'_, DashboardSnapshot> {
    shared.write().unwrap_or_else(|poisoned| {
        tracing::warn!("dashboard write lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Controller-owned side: publishes updates and receives evolution requests.
#[derive(Debug)]
pub struct Dashboard {
    shared: Shared,
    trigger_tx: SyncSender<()>,
    trigger_rx: Receiver<()>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    pub fn new() -> Self {
        let (trigger_tx, trigger_rx) = mpsc::sync_channel(1);
        Self {
            shared: Arc::new(RwLock::new(DashboardSnapshot::default())),
            trigger_tx,
            trigger_rx,
        }
    }

    /// A reader handle; cheap to clone and safe to move to another thread.
    pub fn handle(&self) -> DashboardHandle {
        DashboardHandle {
            shared: Arc::clone(&self.shared),
            trigger: self.trigger_tx.clone(),
        }
    }

    pub(crate) fn publish_state(&self, state: LoopState, cycle: u64) {
        let mut snapshot = write(&self.shared);
        snapshot.state = state;
        snapshot.cycle = cycle;
    }

    /// Make `instruction` current and append it to the bounded history.
    pub(crate) fn publish_instruction(
        &self,
        instruction: &str,
        cycle: u64,
        sensors: &SensorSet,
        provenance: Provenance,
    ) {
        let entry = InstructionSnapshot {
            timestamp: Utc::now(),
            instruction: instruction.to_string(),
            cycle,
            sensors: sensors.clone(),
            provenance,
            completed: false,
        };

        let mut snapshot = write(&self.shared);
        snapshot.history.push_back(entry.clone());
        while snapshot.history.len() > INSTRUCTION_HISTORY {
            snapshot.history.pop_front();
        }
        snapshot.current_instruction = Some(entry);
    }

    /// Mark the current instruction as done.
    pub(crate) fn complete_instruction(&self) {
        let mut snapshot = write(&self.shared);
        if let Some(current) = snapshot.current_instruction.as_mut() {
            current.completed = true;
        }
        if let Some(last) = snapshot.history.back_mut() {
            last.completed = true;
        }
    }

    pub(crate) fn publish_firmware(&self, version: u64, source: &str) {
        let mut snapshot = write(&self.shared);
        snapshot.firmware_version = version;
        snapshot.firmware_source = Some(source.to_string());
    }

    /// Consume a pending evolution request without blocking.
    pub(crate) fn take_evolution_request(&self) -> bool {
        self.trigger_rx.try_recv().is_ok()
    }

    /// Wait up to `timeout` for an evolution request.
    pub(crate) fn wait_evolution_request(&self, timeout: Duration) -> bool {
        match self.trigger_rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Reader side of the dashboard.
#[derive(Debug, Clone)]
pub struct DashboardHandle {
    shared: Shared,
    trigger: SyncSender<()>,
}

impl DashboardHandle {
    pub fn snapshot(&self) -> DashboardSnapshot {
        read(&self.shared).clone()
    }

    pub fn current_instruction(&self) -> Option<InstructionSnapshot> {
        read(&self.shared).current_instruction.clone()
    }

    /// Last instructions, oldest first.
    pub fn history(&self) -> Vec<InstructionSnapshot> {
        read(&self.shared).history.iter().cloned().collect()
    }

    /// Latest firmware version and source, if any was built.
    pub fn firmware(&self) -> Option<(u64, String)> {
        let snapshot = read(&self.shared);
        snapshot
            .firmware_source
            .as_ref()
            .map(|source| (snapshot.firmware_version, source.clone()))
    }

    /// Ask the controller for one evolution cycle.
    ///
    /// Returns `false` when a request is already pending (the two coalesce)
    /// or the controller is gone.
    pub fn request_evolution(&self) -> bool {
        match self.trigger.try_send(()) {
            Ok(()) => {
                tracing::info!("evolution requested");
                true
            }
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Disconnected(())) => {
                tracing::debug!("evolution requested after session ended");
                false
            }
        }
    }
}
