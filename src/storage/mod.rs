//! Persistence for firmware versions, training entries and session logs.
//!
//! Version storage is pluggable (`VersionStore`) with file-based and
//! in-memory backends. Training entries and the session log are plain files.

pub mod file;
pub mod memory;
pub mod session_log;
pub mod training;
pub mod traits;

pub use file::FileVersionStore;
pub use memory::MemoryVersionStore;
pub use session_log::SessionLog;
pub use training::{TrainingEntry, TrainingLog, TrainingSummary};
pub use traits::{BuildMetadata, FirmwareVersion, VersionHandle, VersionMetadata, VersionStore};
