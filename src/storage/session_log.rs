//! End-of-session log.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::context::{ExplorationContext, TelemetrySample};
use crate::core::sensors::SensorSet;
use crate::error::{Result, SketchError};
use crate::storage::traits::VersionMetadata;
use crate::util::{atomic_write_json, read_to_string_limited};

/// Snapshot written once when a session stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub ended_at: DateTime<Utc>,
    pub total_cycles: u64,
    pub sensors_used: SensorSet,
    /// Last retained telemetry samples, oldest first.
    pub data_history: Vec<TelemetrySample>,
    pub firmware_versions: Vec<VersionMetadata>,
}

impl SessionLog {
    /// Capture the last `keep` samples of `context` and the version history.
    pub fn capture(
        context: &ExplorationContext,
        keep: usize,
        firmware_versions: Vec<VersionMetadata>,
    ) -> Self {
        Self {
            ended_at: Utc::now(),
            total_cycles: context.cycle(),
            sensors_used: context.sensors().clone(),
            data_history: context.recent(keep).to_vec(),
            firmware_versions,
        }
    }

    /// Write atomically, replacing any previous log.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| SketchError::storage(parent, e))?;
            }
        }
        atomic_write_json(path, self)?;
        tracing::info!(path = %path.display(), cycles = self.total_cycles, "wrote session log");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = read_to_string_limited(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
