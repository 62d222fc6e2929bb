//! Live exploration session state.
//!
//! The controller owns the only `ExplorationContext`; model calls receive a
//! shared reference to it instead of keeping history of their own.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::sensors::SensorSet;

/// A telemetry snapshot: sensor name → reading, untyped at this layer.
pub type Telemetry = BTreeMap<String, serde_json::Value>;

/// One telemetry reading tagged with the cycle that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub data: Telemetry,
}

impl TelemetrySample {
    pub fn new(cycle: u64, data: Telemetry) -> Self {
        Self {
            cycle,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Session state mutated once per cycle.
#[derive(Debug, Clone)]
pub struct ExplorationContext {
    sensors: SensorSet,
    history: Vec<TelemetrySample>,
    retention: usize,
    cycle: u64,
}

impl ExplorationContext {
    /// Create a context with the initial sensor set.
    ///
    /// `retention` bounds the telemetry history; a value of 0 is treated as 1.
    pub fn new(sensors: SensorSet, retention: usize) -> Self {
        Self {
            sensors,
            history: Vec::new(),
            retention: retention.max(1),
            cycle: 0,
        }
    }

    pub fn sensors(&self) -> &SensorSet {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut SensorSet {
        &mut self.sensors
    }

    /// Current cycle number (0 before the first cycle).
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Advance to the next cycle and return its number.
    pub fn begin_cycle(&mut self) -> u64 {
        self.cycle += 1;
        self.cycle
    }

    /// Append a reading for the current cycle, evicting the oldest beyond retention.
    pub fn record(&mut self, data: Telemetry) -> &TelemetrySample {
        self.history.push(TelemetrySample::new(self.cycle, data));
        if self.history.len() > self.retention {
            let excess = self.history.len() - self.retention;
            self.history.drain(..excess);
        }
        &self.history[self.history.len() - 1]
    }

    /// All retained samples, oldest first.
    pub fn history(&self) -> &[TelemetrySample] {
        &self.history
    }

    /// The last `n` samples, oldest first.
    pub fn recent(&self, n: usize) -> &[TelemetrySample] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// The most recent sample, if any.
    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.history.last()
    }
}
