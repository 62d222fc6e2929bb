//! Append-only training log.
//!
//! Each regeneration is written as its own JSON file under the training
//! directory. File names sort chronologically; existing files are never
//! rewritten.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::context::Telemetry;
use crate::core::records::AnalysisRecord;
use crate::error::{Result, SketchError};
use crate::util::read_to_string_limited;

/// One saved interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingEntry {
    pub timestamp: DateTime<Utc>,
    pub input_data: Telemetry,
    pub ai_analysis: AnalysisRecord,
    pub generated_firmware: String,
    pub outcome: String,
}

impl TrainingEntry {
    pub fn new(
        input_data: Telemetry,
        ai_analysis: AnalysisRecord,
        generated_firmware: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            input_data,
            ai_analysis,
            generated_firmware: generated_firmware.into(),
            outcome: outcome.into(),
        }
    }
}

/// Entry count plus the most recent entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingSummary {
    pub total_entries: usize,
    /// Oldest first.
    pub latest_entries: Vec<TrainingEntry>,
}

/// Directory of training entries.
#[derive(Debug, Clone)]
pub struct TrainingLog {
    dir: PathBuf,
}

/// Collisions within the same microsecond get a numeric suffix.
const MAX_NAME_ATTEMPTS: u32 = 1000;

impl TrainingLog {
    /// Open (creating if needed) the training directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| SketchError::storage(&dir, e))?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `entry` to a new file and return its path.
    pub fn append(&self, entry: &TrainingEntry) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(entry)?;
        let stamp = entry.timestamp.format("%Y%m%dT%H%M%S%.6fZ");

        for n in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(format!("entry_{}_{:03}.json", stamp, n));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(SketchError::storage(&path, e)),
            };

            file.write_all(json.as_bytes())
                .map_err(|e| SketchError::storage(&path, e))?;
            file.sync_all().map_err(|e| SketchError::storage(&path, e))?;

            tracing::debug!(path = %path.display(), "saved training entry");
            return Ok(path);
        }

        Err(SketchError::storage(
            &self.dir,
            io::Error::new(io::ErrorKind::AlreadyExists, "no free training entry name"),
        ))
    }

    /// Entry files in chronological order.
    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| SketchError::storage(&self.dir, e))? {
            let entry = entry.map_err(|e| SketchError::storage(&self.dir, e))?;
            let path = entry.path();

            // Skip non-JSON files and temp files
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            if path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true)
            {
                continue;
            }
            paths.push(path);
        }

        paths.sort();
        Ok(paths)
    }

    /// All readable entries, oldest first.
    pub fn entries(&self) -> Result<Vec<TrainingEntry>> {
        let mut entries = Vec::new();
        for path in self.entry_paths()? {
            let parsed = read_to_string_limited(&path).and_then(|content| {
                serde_json::from_str::<TrainingEntry>(&content).map_err(Into::into)
            });
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    "skipping unreadable training entry: {}",
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// Total count and the last `n` entries.
    pub fn summary(&self, n: usize) -> Result<TrainingSummary> {
        let mut entries = self.entries()?;
        let total_entries = entries.len();
        let latest_entries = entries.split_off(total_entries.saturating_sub(n));

        Ok(TrainingSummary {
            total_entries,
            latest_entries,
        })
    }
}
