//! In-memory version storage for testing.
//!
//! Versions live in a `Vec` and are lost when the store is dropped. Handles
//! carry nominal paths that follow the on-disk layout.

use std::path::PathBuf;

use crate::error::Result;
use crate::storage::traits::{
    BuildMetadata, FirmwareVersion, VersionHandle, VersionMetadata, VersionStore,
};

/// In-memory version store for testing.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: Vec<FirmwareVersion>,
}

impl MemoryVersionStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl VersionStore for MemoryVersionStore {
    fn save(&mut self, sketch: &str, build: BuildMetadata) -> Result<VersionHandle> {
        let version = self.current_version() + 1;
        let sketch_dir = PathBuf::from(format!("v{0}/sketch_v{0}", version));
        let sketch_path = sketch_dir.join(format!("sketch_v{}.ino", version));

        self.versions.push(FirmwareVersion {
            metadata: VersionMetadata::stamp(version, build),
            sketch_source: sketch.to_string(),
        });

        Ok(VersionHandle {
            version,
            sketch_dir,
            sketch_path,
        })
    }

    fn current_version(&self) -> u64 {
        self.versions.len() as u64
    }

    fn get(&self, version: u64) -> Result<Option<FirmwareVersion>> {
        Ok(version
            .checked_sub(1)
            .and_then(|index| self.versions.get(index as usize))
            .cloned())
    }

    fn history(&self) -> Result<Vec<VersionMetadata>> {
        Ok(self.versions.iter().map(|v| v.metadata.clone()).collect())
    }
}
