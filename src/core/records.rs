//! Structured records extracted from suggestion-service replies.
//!
//! Every record carries an explicit [`Provenance`] so callers never have to
//! guess from text content whether an answer came from the model or from the
//! local fallback table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Parsed from a genuine model answer.
    #[default]
    Model,
    /// Built locally after the service failed to produce a usable answer.
    Fallback,
}

impl Provenance {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Provenance::Fallback)
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Model => write!(f, "model"),
            Provenance::Fallback => write!(f, "fallback"),
        }
    }
}

/// A record type that can be decoded from a loosely-typed JSON object.
///
/// Decoding only runs after the required-field presence check has passed,
/// so it never fails: mistyped values are coerced to text or dropped.
pub trait StructuredRecord: Sized {
    /// Fields that must be present for a reply to be accepted.
    const REQUIRED_FIELDS: &'static [&'static str];

    /// Short name used in logs.
    const KIND: &'static str;

    /// Build the record from an object that contains every required field.
    fn from_object(object: &Map<String, Value>) -> Self;
}

/// Coerce any JSON value to display text.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> String {
    object.get(key).map(value_to_text).unwrap_or_default()
}

/// Decode a list of identifiers; a bare string is split on commas.
fn list_field(object: &Map<String, Value>, key: &str) -> Vec<String> {
    let items: Vec<String> = match object.get(key) {
        Some(Value::Array(items)) => items.iter().map(value_to_text).collect(),
        Some(Value::String(s)) => s.split(',').map(|part| part.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    items.into_iter().filter(|item| !item.is_empty()).collect()
}

// =============================================================================
// Analysis
// =============================================================================

/// The model's reading of the latest telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Free-form analysis text.
    pub analysis: String,
    /// Sensors the model wants to add.
    #[serde(default)]
    pub suggested_sensors: Vec<String>,
    /// Firmware fragment to embed in the main loop. `None` when the model sent
    /// something other than text.
    #[serde(default)]
    pub suggested_logic: Option<String>,
    /// What the model wants to explore next.
    #[serde(default)]
    pub exploration_question: String,
    /// What the operator should connect or change.
    pub user_instructions: String,
    #[serde(default)]
    pub provenance: Provenance,
}

impl StructuredRecord for AnalysisRecord {
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["analysis", "suggested_sensors", "user_instructions"];
    const KIND: &'static str = "analysis";

    fn from_object(object: &Map<String, Value>) -> Self {
        let suggested_logic = match object.get("suggested_logic") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        Self {
            analysis: text_field(object, "analysis"),
            suggested_sensors: list_field(object, "suggested_sensors"),
            suggested_logic,
            exploration_question: text_field(object, "exploration_question"),
            user_instructions: text_field(object, "user_instructions"),
            provenance: Provenance::Model,
        }
    }
}

// =============================================================================
// Exploration plan
// =============================================================================

/// A hardware change the operator is asked to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HardwareChange {
    /// Free-form instruction text.
    Plain(String),
    /// A list of separate steps.
    Itemized(Vec<String>),
    /// Connect one sensor to one pin.
    Typed { sensor_kind: String, pin: String },
}

const SENSOR_KIND_KEYS: &[&str] = &["sensor_kind", "sensor", "sensor_type", "type", "component"];
const PIN_KEYS: &[&str] = &["pin", "connection", "port"];

impl HardwareChange {
    /// Decode the loosely-shaped `hardware_changes` value of a model reply.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => HardwareChange::Itemized(
                items
                    .iter()
                    .map(value_to_text)
                    .filter(|item| !item.is_empty())
                    .collect(),
            ),
            Value::Object(object) => {
                let find = |keys: &[&str]| {
                    keys.iter()
                        .filter_map(|key| object.get(*key))
                        .map(value_to_text)
                        .find(|text| !text.is_empty())
                };
                match (find(SENSOR_KIND_KEYS), find(PIN_KEYS)) {
                    (Some(sensor_kind), Some(pin)) => HardwareChange::Typed { sensor_kind, pin },
                    _ => HardwareChange::Itemized(
                        object
                            .iter()
                            .map(|(key, value)| format!("{}: {}", key, value_to_text(value)))
                            .collect(),
                    ),
                }
            }
            other => HardwareChange::Plain(value_to_text(other)),
        }
    }

    /// True when there is nothing for the operator to do.
    pub fn is_empty(&self) -> bool {
        match self {
            HardwareChange::Plain(text) => text.trim().is_empty(),
            HardwareChange::Itemized(items) => items.iter().all(|item| item.trim().is_empty()),
            HardwareChange::Typed { sensor_kind, .. } => sensor_kind.trim().is_empty(),
        }
    }

    /// Render the change as a single operator-facing instruction.
    pub fn describe(&self) -> String {
        match self {
            HardwareChange::Plain(text) => text.trim().to_string(),
            HardwareChange::Itemized(items) => items
                .iter()
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
            HardwareChange::Typed { sensor_kind, pin } => {
                format!("Connect a {} sensor to pin {}", sensor_kind, pin)
            }
        }
    }
}

impl Default for HardwareChange {
    fn default() -> Self {
        HardwareChange::Plain(String::new())
    }
}

/// The model's plan for the next exploration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationPlanRecord {
    pub pattern_analysis: String,
    pub next_exploration: String,
    #[serde(default)]
    pub hardware_changes: HardwareChange,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub provenance: Provenance,
}

impl ExplorationPlanRecord {
    /// The hardware change to surface, if the plan names one.
    pub fn hardware_change(&self) -> Option<&HardwareChange> {
        if self.hardware_changes.is_empty() {
            None
        } else {
            Some(&self.hardware_changes)
        }
    }
}

impl StructuredRecord for ExplorationPlanRecord {
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["pattern_analysis", "next_exploration", "hardware_changes"];
    const KIND: &'static str = "plan";

    fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            pattern_analysis: text_field(object, "pattern_analysis"),
            next_exploration: text_field(object, "next_exploration"),
            hardware_changes: object
                .get("hardware_changes")
                .map(HardwareChange::from_value)
                .unwrap_or_default(),
            expected_outcome: text_field(object, "expected_outcome"),
            provenance: Provenance::Model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_analysis_from_object() {
        let record = AnalysisRecord::from_object(&object(json!({
            "analysis": "Readings are stable",
            "suggested_sensors": ["light", "motion"],
            "suggested_logic": "// keep polling",
            "exploration_question": "Does light follow the sun?",
            "user_instructions": "Connect an LDR to A1",
            "provenance": "fallback"
        })));

        assert_eq!(record.analysis, "Readings are stable");
        assert_eq!(record.suggested_sensors, vec!["light", "motion"]);
        assert_eq!(record.suggested_logic.as_deref(), Some("// keep polling"));
        assert_eq!(record.user_instructions, "Connect an LDR to A1");
        // A model cannot claim fallback provenance for itself
        assert_eq!(record.provenance, Provenance::Model);
    }

    #[test]
    fn test_analysis_coerces_mistyped_fields() {
        let record = AnalysisRecord::from_object(&object(json!({
            "analysis": 42,
            "suggested_sensors": "light, sound ,",
            "suggested_logic": {"code": "x"},
            "user_instructions": null
        })));

        assert_eq!(record.analysis, "42");
        assert_eq!(record.suggested_sensors, vec!["light", "sound"]);
        assert!(record.suggested_logic.is_none());
        assert_eq!(record.user_instructions, "");
        assert_eq!(record.exploration_question, "");
    }

    #[test]
    fn test_hardware_change_plain() {
        let change = HardwareChange::from_value(&json!("Connect light sensor to A1"));
        assert_eq!(change, HardwareChange::Plain("Connect light sensor to A1".into()));
        assert_eq!(change.describe(), "Connect light sensor to A1");
    }

    #[test]
    fn test_hardware_change_itemized() {
        let change = HardwareChange::from_value(&json!(["Unplug A0", "", "Wire PIR to D2"]));
        assert_eq!(
            change,
            HardwareChange::Itemized(vec!["Unplug A0".into(), "Wire PIR to D2".into()])
        );
        assert_eq!(change.describe(), "Unplug A0; Wire PIR to D2");
    }

    #[test]
    fn test_hardware_change_typed() {
        let change = HardwareChange::from_value(&json!({"sensor": "sound", "pin": "A3"}));
        assert_eq!(
            change,
            HardwareChange::Typed {
                sensor_kind: "sound".into(),
                pin: "A3".into()
            }
        );
        assert_eq!(change.describe(), "Connect a sound sensor to pin A3");

        let numeric_pin = HardwareChange::from_value(&json!({"type": "motion", "pin": 2}));
        assert_eq!(numeric_pin.describe(), "Connect a motion sensor to pin 2");
    }

    #[test]
    fn test_hardware_change_untyped_object_is_itemized() {
        let change = HardwareChange::from_value(&json!({"connect": "LED", "remove": "buzzer"}));
        assert_eq!(change.describe(), "connect: LED; remove: buzzer");
    }

    #[test]
    fn test_hardware_change_empty() {
        assert!(HardwareChange::from_value(&Value::Null).is_empty());
        assert!(HardwareChange::from_value(&json!("  ")).is_empty());
        assert!(HardwareChange::from_value(&json!([])).is_empty());
        assert!(!HardwareChange::from_value(&json!("Add LED")).is_empty());
    }

    #[test]
    fn test_plan_hardware_change_accessor() {
        let mut plan = ExplorationPlanRecord::from_object(&object(json!({
            "pattern_analysis": "flat",
            "next_exploration": "add light",
            "hardware_changes": ""
        })));
        assert!(plan.hardware_change().is_none());

        plan.hardware_changes = HardwareChange::Plain("Connect LDR to A1".into());
        assert_eq!(
            plan.hardware_change().map(HardwareChange::describe).as_deref(),
            Some("Connect LDR to A1")
        );
    }

    #[test]
    fn test_hardware_change_serde_is_tagged() {
        let change = HardwareChange::Typed {
            sensor_kind: "light".into(),
            pin: "A1".into(),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["kind"], "typed");
        assert_eq!(json["value"]["pin"], "A1");
    }
}
