//! File-based firmware version storage.
//!
//! Layout under the base directory:
//!
//! ```text
//! version_info.json            {"current_version": N}
//! v1/metadata.json
//! v1/sketch_v1/sketch_v1.ino
//! v2/...
//! ```
//!
//! The sketch and metadata are written (temp file + rename) before the counter.
//! On open the counter is re-derived from the highest slot on disk, so a crash
//! between the two writes never leads to a reused version number.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SketchError};
use crate::storage::traits::{
    BuildMetadata, FirmwareVersion, VersionHandle, VersionMetadata, VersionStore,
};
use crate::util::{atomic_write, atomic_write_json, read_to_string_limited};

/// Counter file name.
pub const VERSION_INFO_FILE: &str = "version_info.json";

/// Metadata file name inside each slot.
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize)]
struct VersionInfo {
    current_version: u64,
}

/// File-based version store.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    /// Directory holding the slots and the counter file.
    base_dir: PathBuf,
    current_version: u64,
}

/// Parse a slot directory name (`v12` → 12).
fn slot_number(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.parse().ok().filter(|n| *n > 0)
}

impl FileVersionStore {
    /// Open (creating if needed) a store rooted at `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).map_err(|e| SketchError::storage(&base_dir, e))?;
        }

        let mut store = Self {
            base_dir,
            current_version: 0,
        };

        let recorded = store.read_counter();
        let on_disk = store.highest_slot()?;
        store.current_version = recorded.max(on_disk);

        if on_disk > recorded {
            tracing::warn!(
                recorded,
                on_disk,
                "version counter behind existing slots, re-deriving"
            );
            if let Err(e) = store.write_counter(store.current_version) {
                tracing::warn!("failed to persist healed version counter: {}", e);
            }
        }

        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn version_dir(&self, version: u64) -> PathBuf {
        self.base_dir.join(format!("v{}", version))
    }

    /// Directory handed to the flasher.
    pub fn sketch_dir(&self, version: u64) -> PathBuf {
        self.version_dir(version).join(format!("sketch_v{}", version))
    }

    pub fn sketch_path(&self, version: u64) -> PathBuf {
        self.sketch_dir(version).join(format!("sketch_v{}.ino", version))
    }

    fn metadata_path(&self, version: u64) -> PathBuf {
        self.version_dir(version).join(METADATA_FILE)
    }

    fn info_path(&self) -> PathBuf {
        self.base_dir.join(VERSION_INFO_FILE)
    }

    /// Recorded counter; missing or unreadable counts as 0.
    fn read_counter(&self) -> u64 {
        let path = self.info_path();
        if !path.exists() {
            return 0;
        }

        let parsed = read_to_string_limited(&path).and_then(|content| {
            serde_json::from_str::<VersionInfo>(&content).map_err(Into::into)
        });
        match parsed {
            Ok(info) => info.current_version,
            Err(e) => {
                tracing::warn!("unreadable version counter, re-deriving from slots: {}", e);
                0
            }
        }
    }

    fn write_counter(&self, version: u64) -> Result<()> {
        atomic_write_json(
            &self.info_path(),
            &VersionInfo {
                current_version: version,
            },
        )
    }

    /// Highest `v{N}` slot directory present.
    fn highest_slot(&self) -> Result<u64> {
        let entries =
            fs::read_dir(&self.base_dir).map_err(|e| SketchError::storage(&self.base_dir, e))?;

        let mut highest = 0;
        for entry in entries {
            let entry = entry.map_err(|e| SketchError::storage(&self.base_dir, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(n) = slot_number(&entry.file_name().to_string_lossy()) {
                highest = highest.max(n);
            }
        }
        Ok(highest)
    }

    /// Sketch first, metadata last: a slot with readable metadata is complete.
    fn write_slot(&self, version: u64, sketch: &str, metadata: &VersionMetadata) -> Result<()> {
        let sketch_dir = self.sketch_dir(version);
        fs::create_dir_all(&sketch_dir).map_err(|e| SketchError::storage(&sketch_dir, e))?;
        atomic_write(&self.sketch_path(version), sketch.as_bytes())?;
        atomic_write_json(&self.metadata_path(version), metadata)
    }

    fn read_metadata(&self, version: u64) -> Result<Option<VersionMetadata>> {
        let path = self.metadata_path(version);
        if !path.exists() {
            return Ok(None);
        }
        let content = read_to_string_limited(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl VersionStore for FileVersionStore {
    fn save(&mut self, sketch: &str, build: BuildMetadata) -> Result<VersionHandle> {
        let version = self.current_version.max(self.highest_slot()?) + 1;
        let slot = self.version_dir(version);

        fs::create_dir(&slot).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => SketchError::version_conflict(version),
            _ => SketchError::storage(&slot, e),
        })?;

        let metadata = VersionMetadata::stamp(version, build);
        if let Err(e) = self.write_slot(version, sketch, &metadata) {
            if let Err(cleanup) = fs::remove_dir_all(&slot) {
                tracing::warn!(version, "failed to remove partial slot: {}", cleanup);
            }
            return Err(e);
        }

        self.current_version = version;
        if let Err(e) = self.write_counter(version) {
            // The slot is complete; the next open re-derives the counter.
            tracing::warn!(version, "failed to persist version counter: {}", e);
        }

        tracing::info!(
            version,
            sensors = %metadata.sensors,
            reason = %metadata.reason,
            "saved firmware version"
        );

        Ok(VersionHandle {
            version,
            sketch_dir: self.sketch_dir(version),
            sketch_path: self.sketch_path(version),
        })
    }

    fn current_version(&self) -> u64 {
        self.current_version
    }

    fn get(&self, version: u64) -> Result<Option<FirmwareVersion>> {
        if version == 0 {
            return Ok(None);
        }
        let Some(metadata) = self.read_metadata(version)? else {
            return Ok(None);
        };
        let sketch_source = read_to_string_limited(&self.sketch_path(version))?;

        Ok(Some(FirmwareVersion {
            metadata,
            sketch_source,
        }))
    }

    fn history(&self) -> Result<Vec<VersionMetadata>> {
        let mut history = Vec::new();
        for version in 1..=self.current_version {
            match self.read_metadata(version) {
                Ok(Some(metadata)) => history.push(metadata),
                Ok(None) => tracing::debug!(version, "version has no metadata, skipping"),
                Err(e) => tracing::warn!(version, "skipping unreadable version metadata: {}", e),
            }
        }
        Ok(history)
    }
}
