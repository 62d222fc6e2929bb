//! Exploration loop state machine.
//!
//! ```text
//! Idle → Connected → { Analyzing → MaybeFlashing → Planning → [AwaitingHardwareChange] } → Stopped
//! ```
//!
//! Any non-terminal state may move to `Stopped` on operator interrupt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SketchError};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Not connected to a device yet.
    #[default]
    Idle,
    /// Device link established.
    Connected,
    /// Reading telemetry and asking the model for an analysis.
    Analyzing,
    /// Deciding on, rendering and flashing new firmware.
    MaybeFlashing,
    /// Asking the model for the next exploration step.
    Planning,
    /// Blocked until the operator confirms a hardware change.
    AwaitingHardwareChange,
    /// Session over; transport released and session log flushed.
    Stopped,
}

impl LoopState {
    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped)
    }

    /// Check whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: LoopState) -> bool {
        use LoopState::*;

        if next == Stopped {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Idle, Connected)
                | (Connected, Analyzing)
                | (Analyzing, MaybeFlashing)
                | (MaybeFlashing, Planning)
                | (Planning, AwaitingHardwareChange)
                | (Planning, Analyzing)
                | (AwaitingHardwareChange, Analyzing)
        )
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "Idle",
            LoopState::Connected => "Connected",
            LoopState::Analyzing => "Analyzing",
            LoopState::MaybeFlashing => "MaybeFlashing",
            LoopState::Planning => "Planning",
            LoopState::AwaitingHardwareChange => "AwaitingHardwareChange",
            LoopState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: LoopState,
    pub to: LoopState,
    pub cycle: u64,
    pub at: DateTime<Utc>,
}

/// Tracks the current state and rejects illegal transitions.
#[derive(Debug, Clone, Default)]
pub struct LoopStateMachine {
    state: LoopState,
    transitions: Vec<Transition>,
}

/// Maximum number of transitions kept for inspection.
const MAX_TRANSITIONS: usize = 256;

impl LoopStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Move to `next`, recording the transition.
    pub fn advance(&mut self, next: LoopState, cycle: u64) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SketchError::invalid_state(format!(
                "Cannot move from {} to {}",
                self.state, next
            )));
        }

        self.transitions.push(Transition {
            from: self.state,
            to: next,
            cycle,
            at: Utc::now(),
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            self.transitions.remove(0);
        }

        tracing::debug!(from = %self.state, to = %next, cycle, "state transition");
        self.state = next;
        Ok(())
    }

    /// Move to `Stopped` unless already there.
    pub fn stop(&mut self, cycle: u64) {
        if !self.state.is_terminal() {
            // Every non-terminal state may stop.
            let _ = self.advance(LoopState::Stopped, cycle);
        }
    }

    /// Recent transitions, oldest first.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }
}
