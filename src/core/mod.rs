//! Core types for SketchLoop.
//!
//! Sensor sets, the structured records extracted from model replies, the
//! live exploration context, and the loop state machine.

pub mod context;
pub mod records;
pub mod sensors;
pub mod state;

pub use context::{ExplorationContext, Telemetry, TelemetrySample};
pub use records::{
    AnalysisRecord, ExplorationPlanRecord, HardwareChange, Provenance, StructuredRecord,
};
pub use sensors::{normalize_sensor_id, SensorSet, KNOWN_SENSORS};
pub use state::{LoopState, LoopStateMachine, Transition};
