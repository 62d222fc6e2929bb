//! Prompt construction for the suggestion service.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;

use crate::core::context::{ExplorationContext, TelemetrySample};
use crate::core::sensors::SensorSet;
use crate::storage::training::TrainingEntry;

/// Bounds on how many recent samples go into a prompt.
pub const MIN_HISTORY_WINDOW: usize = 3;
pub const MAX_HISTORY_WINDOW: usize = 5;

/// Ideas mixed into prompts so consecutive suggestions do not repeat.
pub const INSPIRATION_POOL: &[&str] = &[
    "a light sensor to track how brightness changes through the day",
    "a motion sensor to notice when someone walks past",
    "a humidity sensor to compare against temperature swings",
    "a sound sensor to hear claps and background noise",
    "a push button so the operator can mark interesting moments",
    "a potentiometer as a manual dial to correlate against other readings",
    "a gas sensor to watch air quality near a window",
    "thresholds that light the onboard LED when a reading spikes",
    "averaging several readings to smooth out noise",
    "comparing the rate of change between two sensors",
];

/// Clamp the configured window to the supported range.
pub fn clamp_window(window: usize) -> usize {
    window.clamp(MIN_HISTORY_WINDOW, MAX_HISTORY_WINDOW)
}

/// Draw one inspiration hint.
pub fn pick_inspiration<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    INSPIRATION_POOL
        .choose(rng)
        .copied()
        .unwrap_or("adding one new sensor")
}

fn history_json(samples: &[TelemetrySample]) -> String {
    let items: Vec<_> = samples
        .iter()
        .map(|s| json!({ "cycle": s.cycle, "data": s.data }))
        .collect();
    serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string())
}

fn sensors_json(sensors: &SensorSet) -> String {
    serde_json::to_string(sensors.as_slice()).unwrap_or_else(|_| "[]".to_string())
}

/// Ask for an analysis of the latest telemetry.
pub fn analysis_prompt(context: &ExplorationContext, window: usize, inspiration: &str) -> String {
    let latest = context
        .latest()
        .map(|sample| serde_json::to_string(&sample.data).unwrap_or_else(|_| "{}".to_string()))
        .unwrap_or_else(|| "{}".to_string());
    let recent = history_json(context.recent(clamp_window(window)));

    format!(
        r#"Analyze Arduino sensor data: {latest}
Active sensors: {sensors}
Recent readings: {recent}
Cycle: {cycle}

Based on this data, suggest:
1. What new sensors to add
2. What connections to change
3. What logic to implement
4. Questions to explore

For inspiration, consider {inspiration}.

Respond in JSON format:
{{
  "analysis": "brief analysis",
  "suggested_sensors": ["sensor1", "sensor2"],
  "suggested_logic": "Arduino code snippet",
  "exploration_question": "What should we explore next?",
  "user_instructions": "Tell user what to connect/change"
}}
"#,
        latest = latest,
        sensors = sensors_json(context.sensors()),
        recent = recent,
        cycle = context.cycle(),
        inspiration = inspiration,
    )
}

/// Ask for the next exploration step.
pub fn plan_prompt(
    sensors: &SensorSet,
    history: &[TelemetrySample],
    window: usize,
    inspiration: &str,
) -> String {
    let start = history.len().saturating_sub(clamp_window(window));

    format!(
        r#"Current sensors: {sensors}
Recent data: {recent}

Generate next exploration step:
1. What patterns do you see?
2. What should we explore next?
3. What hardware changes are needed?

One direction worth considering: {inspiration}.

JSON response format:
{{
  "pattern_analysis": "what patterns found",
  "next_exploration": "specific next step",
  "hardware_changes": "what user should connect/disconnect",
  "expected_outcome": "what we expect to learn"
}}
"#,
        sensors = sensors_json(sensors),
        recent = history_json(&history[start..]),
        inspiration = inspiration,
    )
}

/// Feed recent training entries back to the service.
pub fn training_prompt(entries: &[TrainingEntry]) -> String {
    let examples: Vec<_> = entries
        .iter()
        .map(|entry| {
            json!({
                "input": entry.input_data,
                "analysis": entry.ai_analysis.analysis,
                "sensors": entry.ai_analysis.suggested_sensors,
                "outcome": entry.outcome,
            })
        })
        .collect();

    format!(
        "Learn from these exploration examples to improve future suggestions:\n{}\n\nReply with a short summary of what worked.",
        serde_json::to_string_pretty(&examples).unwrap_or_else(|_| "[]".to_string())
    )
}
