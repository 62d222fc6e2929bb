//! Render command for SketchLoop.
//!
//! Prints the sketch that would be built for a sensor list and logic
//! fragment, after the fragment has been screened.

use serde::{Deserialize, Serialize};

use crate::core::SensorSet;
use crate::firmware::{render, sanitize, template_for};

/// Options for the render command.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Sensor identifiers, in emission order.
    pub sensors: Vec<String>,
    /// Logic fragment to embed.
    pub logic: Option<String>,
}

/// Output format for the render command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOutput {
    pub success: bool,
    /// Deduplicated sensor set used for rendering.
    pub sensors: Vec<String>,
    /// Sensors without a template; they contribute no code.
    pub unsupported: Vec<String>,
    /// The fragment as embedded.
    pub logic: String,
    /// Whether screening changed the fragment.
    pub logic_rewritten: bool,
    pub sketch: String,
}

/// The render command implementation.
#[derive(Debug, Default)]
pub struct RenderCommand;

impl RenderCommand {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, options: &RenderOptions) -> RenderOutput {
        let sensors = SensorSet::from_ids(&options.sensors);
        let unsupported = sensors
            .iter()
            .filter(|id| template_for(id).is_none())
            .map(str::to_string)
            .collect();

        let raw = options.logic.as_deref().unwrap_or_default();
        let logic = sanitize(raw);
        let logic_rewritten = !raw.trim().is_empty() && logic != raw.trim();

        RenderOutput {
            success: true,
            sensors: sensors.as_slice().to_vec(),
            unsupported,
            sketch: render(&sensors, &logic),
            logic,
            logic_rewritten,
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &RenderOutput, options: &RenderOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &RenderOutput) -> String {
        let mut lines = Vec::new();
        if !output.unsupported.is_empty() {
            lines.push(format!(
                "// Not yet supported, omitted: {}",
                output.unsupported.join(", ")
            ));
        }
        if output.logic_rewritten {
            lines.push("// Logic fragment was rewritten by the safety filter".to_string());
        }
        lines.push(output.sketch.clone());
        lines.join("\n")
    }
}
