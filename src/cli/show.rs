//! Show command for SketchLoop.
//!
//! Prints one saved firmware version with its metadata.

use serde::{Deserialize, Serialize};

use crate::storage::{VersionMetadata, VersionStore};

/// Options for the show command.
#[derive(Debug, Clone, Default)]
pub struct ShowOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Version to show; latest when absent.
    pub version: Option<u64>,
}

/// Output format for the show command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VersionMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sketch_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShowOutput {
    pub fn success(metadata: VersionMetadata, sketch_source: String) -> Self {
        Self {
            success: true,
            metadata: Some(metadata),
            sketch_source: Some(sketch_source),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            metadata: None,
            sketch_source: None,
            error: Some(error.into()),
        }
    }
}

/// The show command implementation.
pub struct ShowCommand<S: VersionStore> {
    store: S,
}

impl<S: VersionStore> ShowCommand<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn run(&self, options: &ShowOptions) -> ShowOutput {
        let found = match options.version {
            Some(version) => self.store.get(version),
            None => self.store.latest(),
        };

        match found {
            Ok(Some(firmware)) => ShowOutput::success(firmware.metadata, firmware.sketch_source),
            Ok(None) => match options.version {
                Some(version) => ShowOutput::failure(format!("Version {} not found", version)),
                None => ShowOutput::failure("No firmware versions saved yet"),
            },
            Err(e) => ShowOutput::failure(e.to_string()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &ShowOutput, options: &ShowOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &ShowOutput) -> String {
        let (Some(meta), Some(source)) = (&output.metadata, &output.sketch_source) else {
            return format!(
                "Show failed: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            );
        };

        let mut lines = vec![
            format!("// Version {}", meta.version),
            format!("// Built: {}", meta.timestamp.to_rfc3339()),
            format!("// Cycle: {}", meta.cycle),
            format!("// Sensors: {}", meta.sensors),
            format!("// Reason: {}", meta.reason),
        ];
        if meta.ai_evolved == Some(true) {
            lines.push("// Evolved from model analysis".to_string());
        }
        lines.push(String::new());
        lines.push(source.clone());
        lines.join("\n")
    }
}
