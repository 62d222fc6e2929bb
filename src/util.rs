//! Filesystem helpers shared by the stores.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SketchError};

/// Maximum file size that can be read into memory (10 MB).
///
/// Sketches and metadata records are a few kilobytes; anything larger is
/// almost certainly not ours.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Read a file into a string, refusing files larger than `MAX_FILE_SIZE`.
pub fn read_to_string_limited(path: &Path) -> Result<String> {
    read_to_string_with_limit(path, MAX_FILE_SIZE)
}

/// Read a file into a string with a custom size limit.
///
/// # Errors
///
/// Returns an error if the file exceeds `max_size` or cannot be read.
pub fn read_to_string_with_limit(path: &Path, max_size: u64) -> Result<String> {
    let metadata = fs::metadata(path).map_err(|e| SketchError::storage(path, e))?;

    let size = metadata.len();
    if size > max_size {
        return Err(SketchError::storage(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file too large ({} bytes, max {} bytes)", size, max_size),
            ),
        ));
    }

    fs::read_to_string(path).map_err(|e| SketchError::storage(path, e))
}

/// Temp path used while writing `path` atomically.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

/// Write `content` to `path` via temp file + fsync + rename.
///
/// Readers observe either the previous content or the new content, never a
/// torn write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);

    {
        let mut file =
            fs::File::create(&temp_path).map_err(|e| SketchError::storage(&temp_path, e))?;
        file.write_all(content)
            .map_err(|e| SketchError::storage(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| SketchError::storage(&temp_path, e))?;
    }

    // Rename temp file to final path (atomic on POSIX)
    fs::rename(&temp_path, path).map_err(|e| SketchError::storage(path, e))?;

    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}
