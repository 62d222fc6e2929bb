//! Session orchestration: the exploration loop and its operator surfaces.

pub mod ack;
pub mod dashboard;
pub mod explorer;

pub use ack::{AckOutcome, Acknowledger, AutoAcknowledger, LineAcknowledger};
pub use dashboard::{Dashboard, DashboardHandle, DashboardSnapshot, InstructionSnapshot};
pub use explorer::{
    BuildOutcome, Collaborators, CycleReport, ExplorationController, SessionSummary,
    INITIAL_REASON,
};
