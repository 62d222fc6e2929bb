//! SketchLoop - model-guided Arduino sensor exploration
//!
//! SketchLoop reads telemetry from a connected board, asks a local language
//! model what the readings mean, regenerates and flashes firmware for the
//! sensors it suggests, and asks the operator to wire new hardware. Every
//! build is kept as a numbered version and every regeneration is saved as a
//! training entry.

pub mod cli;
pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod firmware;
pub mod hardware;
pub mod model;
pub mod storage;
pub mod util;

pub use config::Config;
pub use controller::{
    AckOutcome, Acknowledger, Collaborators, CycleReport, DashboardHandle, DashboardSnapshot,
    ExplorationController, SessionSummary,
};
pub use core::{
    AnalysisRecord, ExplorationContext, ExplorationPlanRecord, LoopState, Provenance, SensorSet,
    Telemetry,
};
pub use error::{Result, SketchError};
pub use firmware::{render, sanitize};
pub use hardware::{DeviceTransport, Flasher, Transport};
pub use model::{CompletionService, HttpCompletionService, ModelClient};
pub use storage::{FileVersionStore, MemoryVersionStore, TrainingLog, VersionStore};

// CLI commands
pub use cli::{HistoryCommand, RenderCommand, RunCommand, ShowCommand, TrainingCommand};
