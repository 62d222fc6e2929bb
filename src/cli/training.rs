//! Training command for SketchLoop.
//!
//! Summarizes the saved training entries.

use serde::Serialize;

use crate::storage::{TrainingLog, TrainingSummary};

/// Entries shown when no limit is given.
pub const DEFAULT_TRAINING_LIMIT: usize = 5;

/// Options for the training command.
#[derive(Debug, Clone, Default)]
pub struct TrainingOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Number of recent entries to include.
    pub limit: Option<usize>,
}

/// Output format for the training command.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutput {
    pub success: bool,
    #[serde(flatten)]
    pub summary: TrainingSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrainingOutput {
    pub fn success(summary: TrainingSummary) -> Self {
        Self {
            success: true,
            summary,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: TrainingSummary::default(),
            error: Some(error.into()),
        }
    }
}

/// The training command implementation.
pub struct TrainingCommand {
    log: TrainingLog,
}

impl TrainingCommand {
    pub fn new(log: TrainingLog) -> Self {
        Self { log }
    }

    pub fn run(&self, options: &TrainingOptions) -> TrainingOutput {
        let limit = options.limit.unwrap_or(DEFAULT_TRAINING_LIMIT);
        match self.log.summary(limit) {
            Ok(summary) => TrainingOutput::success(summary),
            Err(e) => TrainingOutput::failure(e.to_string()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &TrainingOutput, options: &TrainingOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &TrainingOutput) -> String {
        if !output.success {
            return format!(
                "Training summary failed: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            );
        }

        let summary = &output.summary;
        if summary.total_entries == 0 {
            return "No training entries yet.\n".to_string();
        }

        let mut lines = vec![format!(
            "{} training entr{} ({} shown):\n",
            summary.total_entries,
            if summary.total_entries == 1 { "y" } else { "ies" },
            summary.latest_entries.len()
        )];
        for entry in &summary.latest_entries {
            lines.push(format!(
                "{}  [{}]  {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.ai_analysis.provenance,
                entry.outcome
            ));
            if !entry.ai_analysis.suggested_sensors.is_empty() {
                lines.push(format!(
                    "    suggested: {}",
                    entry.ai_analysis.suggested_sensors.join(", ")
                ));
            }
            lines.push(format!("    readings: {}", entry.input_data.len()));
        }
        lines.join("\n")
    }
}
