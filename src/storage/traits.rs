//! Firmware version storage traits.
//!
//! This module defines the `VersionStore` trait and the records it persists.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::sensors::SensorSet;
use crate::error::Result;

/// Caller-supplied description of a build, stamped by the store on save.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildMetadata {
    pub sensors: SensorSet,
    pub reason: String,
    pub cycle: u64,
    /// Set for builds derived from a model analysis.
    pub ai_evolved: Option<bool>,
}

impl BuildMetadata {
    pub fn new(sensors: SensorSet, reason: impl Into<String>, cycle: u64) -> Self {
        Self {
            sensors,
            reason: reason.into(),
            cycle,
            ai_evolved: None,
        }
    }

    pub fn evolved(mut self) -> Self {
        self.ai_evolved = Some(true);
        self
    }
}

/// The persisted metadata record of one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub sensors: SensorSet,
    pub reason: String,
    pub cycle: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_evolved: Option<bool>,
}

impl VersionMetadata {
    /// Stamp `build` with its version number and the current time.
    pub fn stamp(version: u64, build: BuildMetadata) -> Self {
        Self {
            version,
            timestamp: Utc::now(),
            sensors: build.sensors,
            reason: build.reason,
            cycle: build.cycle,
            ai_evolved: build.ai_evolved,
        }
    }
}

/// A stored version: metadata plus the sketch source.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareVersion {
    pub metadata: VersionMetadata,
    pub sketch_source: String,
}

impl FirmwareVersion {
    pub fn version(&self) -> u64 {
        self.metadata.version
    }
}

/// Where a saved version lives.
///
/// `sketch_dir` is what the flasher receives. Paths are nominal for stores
/// that do not touch the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionHandle {
    pub version: u64,
    pub sketch_dir: PathBuf,
    pub sketch_path: PathBuf,
}

/// Trait for firmware version stores.
///
/// Versions are immutable once written and numbered 1, 2, 3, … without reuse,
/// including across restarts. Stores assume a single writer; `save` takes
/// `&mut self` so the borrow checker enforces it in-process.
pub trait VersionStore: Send {
    /// Persist `sketch` as the next version.
    ///
    /// On error nothing is left behind that a later `save` or `history` would
    /// mistake for a complete version, and the counter is unchanged.
    fn save(&mut self, sketch: &str, build: BuildMetadata) -> Result<VersionHandle>;

    /// The highest version saved so far (0 when empty).
    fn current_version(&self) -> u64;

    /// Retrieve one version.
    ///
    /// Returns `Ok(None)` if the version doesn't exist.
    fn get(&self, version: u64) -> Result<Option<FirmwareVersion>>;

    /// Metadata for versions 1..=current, oldest first.
    ///
    /// Versions whose metadata is unreadable are skipped.
    fn history(&self) -> Result<Vec<VersionMetadata>>;

    /// The most recent version, if any.
    fn latest(&self) -> Result<Option<FirmwareVersion>> {
        match self.current_version() {
            0 => Ok(None),
            n => self.get(n),
        }
    }
}

impl<T: VersionStore + ?Sized> VersionStore for Box<T> {
    fn save(&mut self, sketch: &str, build: BuildMetadata) -> Result<VersionHandle> {
        (**self).save(sketch, build)
    }

    fn current_version(&self) -> u64 {
        (**self).current_version()
    }

    fn get(&self, version: u64) -> Result<Option<FirmwareVersion>> {
        (**self).get(version)
    }

    fn history(&self) -> Result<Vec<VersionMetadata>> {
        (**self).history()
    }
}

/// Test utilities for VersionStore implementations.
#[cfg(test)]
pub mod tests {
    use super::*;

    /// Test helper to verify VersionStore implementations.
    pub fn test_version_store_contract<S: VersionStore>(store: &mut S) {
        // Initially empty
        assert_eq!(store.current_version(), 0);
        assert!(store.history().unwrap().is_empty());
        assert!(store.latest().unwrap().is_none());
        assert!(store.get(1).unwrap().is_none());

        let sensors = SensorSet::from_ids(["temperature"]);
        let first = store
            .save(
                "void setup() {}\nvoid loop() {}",
                BuildMetadata::new(sensors.clone(), "Initial setup with basic sensors", 0),
            )
            .unwrap();
        assert_eq!(first.version, 1);

        let second = store
            .save(
                "// second",
                BuildMetadata::new(
                    SensorSet::from_ids(["temperature", "light"]),
                    "AI suggested: light",
                    1,
                )
                .evolved(),
            )
            .unwrap();
        assert_eq!(second.version, 2);
        assert_ne!(first.sketch_dir, second.sketch_dir);

        // Version 1 unchanged
        let v1 = store.get(1).unwrap().unwrap();
        assert_eq!(v1.sketch_source, "void setup() {}\nvoid loop() {}");
        assert_eq!(v1.metadata.sensors, sensors);
        assert_eq!(v1.metadata.ai_evolved, None);

        let v2 = store.latest().unwrap().unwrap();
        assert_eq!(v2.version(), 2);
        assert_eq!(v2.metadata.ai_evolved, Some(true));
        assert_eq!(v2.metadata.cycle, 1);

        let history = store.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[1].version, 2);
        assert_eq!(history[0].reason, "Initial setup with basic sensors");
        assert!(history[0].timestamp <= history[1].timestamp);
        assert_eq!(store.current_version(), 2);
    }
}
