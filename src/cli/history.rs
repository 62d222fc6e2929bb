//! History command for SketchLoop.
//!
//! Lists saved firmware versions, oldest first.

use serde::{Deserialize, Serialize};

use crate::storage::{VersionMetadata, VersionStore};

/// Options for the history command.
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Show only the most recent N versions.
    pub limit: Option<usize>,
}

/// Output format for the history command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryOutput {
    pub success: bool,
    pub current_version: u64,
    pub count: usize,
    pub versions: Vec<VersionMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryOutput {
    pub fn success(current_version: u64, versions: Vec<VersionMetadata>) -> Self {
        Self {
            success: true,
            current_version,
            count: versions.len(),
            versions,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            current_version: 0,
            count: 0,
            versions: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The history command implementation.
pub struct HistoryCommand<S: VersionStore> {
    store: S,
}

impl<S: VersionStore> HistoryCommand<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn run(&self, options: &HistoryOptions) -> HistoryOutput {
        match self.store.history() {
            Ok(mut versions) => {
                if let Some(limit) = options.limit {
                    let skip = versions.len().saturating_sub(limit);
                    versions.drain(..skip);
                }
                HistoryOutput::success(self.store.current_version(), versions)
            }
            Err(e) => HistoryOutput::failure(e.to_string()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &HistoryOutput, options: &HistoryOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &HistoryOutput) -> String {
        if !output.success {
            return format!(
                "History failed: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            );
        }

        if output.versions.is_empty() {
            return "No firmware versions saved yet.\n".to_string();
        }

        let mut lines = vec![format!(
            "{} version(s), current v{}:\n",
            output.count, output.current_version
        )];
        for meta in &output.versions {
            let evolved = if meta.ai_evolved == Some(true) {
                " [evolved]"
            } else {
                ""
            };
            lines.push(format!(
                "v{}  {}  cycle {}  {}{}",
                meta.version,
                meta.timestamp.format("%Y-%m-%d %H:%M:%S"),
                meta.cycle,
                meta.reason,
                evolved
            ));
            lines.push(format!("    sensors: {}", meta.sensors));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SensorSet;
    use crate::storage::{BuildMetadata, FileVersionStore, MemoryVersionStore};
    use tempfile::TempDir;

    fn store_with(n: u64) -> MemoryVersionStore {
        let mut store = MemoryVersionStore::new();
        for i in 1..=n {
            let build = BuildMetadata::new(
                SensorSet::from_ids(["temperature"]),
                format!("build {}", i),
                i,
            );
            store.save("void setup() {}", build).unwrap();
        }
        store
    }

    #[test]
    fn test_history_lists_all() {
        let cmd = HistoryCommand::new(store_with(3));
        let output = cmd.run(&HistoryOptions::default());

        assert!(output.success);
        assert_eq!(output.current_version, 3);
        assert_eq!(output.count, 3);
        assert_eq!(output.versions[0].reason, "build 1");
    }

    #[test]
    fn test_history_limit_keeps_latest() {
        let cmd = HistoryCommand::new(store_with(4));
        let options = HistoryOptions {
            limit: Some(2),
            ..HistoryOptions::default()
        };
        let output = cmd.run(&options);

        let versions: Vec<u64> = output.versions.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![3, 4]);
        assert_eq!(output.current_version, 4);
    }

    #[test]
    fn test_history_empty_file_store() {
        let dir = TempDir::new().unwrap();
        let store = FileVersionStore::open(dir.path().join("firmware_versions")).unwrap();
        let cmd = HistoryCommand::new(store);
        let output = cmd.run(&HistoryOptions::default());

        assert!(output.success);
        let text = cmd.format_output(&output, &HistoryOptions::default());
        assert_eq!(text, "No firmware versions saved yet.\n");
    }

    #[test]
    fn test_format_human_readable() {
        let cmd = HistoryCommand::new(store_with(1));
        let output = cmd.run(&HistoryOptions::default());
        let text = cmd.format_output(&output, &HistoryOptions::default());

        assert!(text.contains("1 version(s), current v1"));
        assert!(text.contains("build 1"));
        assert!(text.contains("sensors: temperature"));
    }

    #[test]
    fn test_format_output_json() {
        let cmd = HistoryCommand::new(store_with(2));
        let options = HistoryOptions {
            json: true,
            ..HistoryOptions::default()
        };
        let output = cmd.run(&options);
        let parsed: serde_json::Value =
            serde_json::from_str(&cmd.format_output(&output, &options)).unwrap();
        assert_eq!(parsed["count"], 2);
        assert_eq!(parsed["versions"][1]["version"], 2);
        assert!(parsed.get("error").is_none());
    }

    #[test]
    fn test_format_failure() {
        let cmd = HistoryCommand::new(store_with(0));
        let output = HistoryOutput::failure("disk gone");
        let text = cmd.format_output(&output, &HistoryOptions::default());
        assert_eq!(text, "History failed: disk gone\n");
    }
}
