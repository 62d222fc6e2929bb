//! Firmware source rendering.
//!
//! Rendering is a pure function of the sensor set and logic fragment. Each
//! sensor maps to a declarative [`SensorTemplate`]; adding hardware support is
//! a table entry, never a new branch.

use crate::core::sensors::SensorSet;

/// Serial baud rate the generated firmware and the transport agree on.
pub const BAUD_RATE: u32 = 9600;

/// Command token that makes the firmware emit one report line.
pub const REPORT_COMMAND: &str = "READ";

/// Delay at the end of every main-loop iteration.
pub const POLL_DELAY_MS: u32 = 100;

/// Logic used when the caller has nothing to add.
pub const NO_LOGIC: &str = "// No additional logic";

/// Mandatory serial initialization call.
pub fn serial_init_line() -> String {
    format!("Serial.begin({});", BAUD_RATE)
}

/// How one sensor is initialized and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorTemplate {
    /// Sensor identifier as used in a [`SensorSet`].
    pub id: &'static str,
    /// Line emitted inside `setup()`.
    pub setup_line: &'static str,
    /// Field name in the report object.
    pub report_key: &'static str,
    /// Expression that reads the current value.
    pub read_expr: &'static str,
}

/// Sensor → (setup line, read expression) table.
pub const SENSOR_TEMPLATES: &[SensorTemplate] = &[
    SensorTemplate {
        id: "temperature",
        setup_line: "// Temperature sensor on A0",
        report_key: "temp",
        read_expr: "analogRead(A0)",
    },
    SensorTemplate {
        id: "light",
        setup_line: "// Light sensor on A1",
        report_key: "light",
        read_expr: "analogRead(A1)",
    },
    SensorTemplate {
        id: "motion",
        setup_line: "pinMode(2, INPUT); // Motion sensor",
        report_key: "motion",
        read_expr: "digitalRead(2)",
    },
    SensorTemplate {
        id: "humidity",
        setup_line: "// Humidity sensor on A2",
        report_key: "humidity",
        read_expr: "analogRead(A2)",
    },
    SensorTemplate {
        id: "sound",
        setup_line: "// Sound sensor on A3",
        report_key: "sound",
        read_expr: "analogRead(A3)",
    },
    SensorTemplate {
        id: "button",
        setup_line: "pinMode(3, INPUT_PULLUP); // Push button",
        report_key: "button",
        read_expr: "digitalRead(3)",
    },
    SensorTemplate {
        id: "potentiometer",
        setup_line: "// Potentiometer on A4",
        report_key: "pot",
        read_expr: "analogRead(A4)",
    },
    SensorTemplate {
        id: "gas",
        setup_line: "// Gas sensor on A5",
        report_key: "gas",
        read_expr: "analogRead(A5)",
    },
];

/// Look up the template for a sensor identifier.
pub fn template_for(id: &str) -> Option<&'static SensorTemplate> {
    SENSOR_TEMPLATES.iter().find(|t| t.id == id)
}

/// Templates for the sensors in `sensors` that have one, in set order.
fn known_templates(sensors: &SensorSet) -> Vec<&'static SensorTemplate> {
    sensors.iter().filter_map(template_for).collect()
}

fn render_setup(templates: &[&SensorTemplate]) -> String {
    if templates.is_empty() {
        return "  // No sensors configured".to_string();
    }
    templates
        .iter()
        .map(|t| format!("  {}", t.setup_line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One `Serial.print` per field; the separator travels with the next field so
/// the object never ends in a trailing comma.
fn render_report(templates: &[&SensorTemplate]) -> String {
    if templates.is_empty() {
        return r#"    Serial.print("\"status\":\"no_sensors\"");"#.to_string();
    }
    templates
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let sep = if i == 0 { "" } else { "," };
            format!(
                r#"    Serial.print("{}\"{}\":" + String({}));"#,
                sep, t.report_key, t.read_expr
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_logic(logic: &str) -> String {
    let logic = if logic.trim().is_empty() {
        NO_LOGIC
    } else {
        logic
    };
    logic
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("  {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a complete sketch.
///
/// `logic` must already be sanitized; it is inserted verbatim after the report
/// block. Sensors without a template contribute nothing.
pub fn render(sensors: &SensorSet, logic: &str) -> String {
    let templates = known_templates(sensors);

    format!(
        r#"void setup() {{
  {init}
{setup}
}}

void loop() {{
  if (Serial.available() && Serial.readString().indexOf("{command}") >= 0) {{
    Serial.print("{{");
{report}
    Serial.println("}}");
  }}

{logic}

  delay({delay});
}}
"#,
        init = serial_init_line(),
        setup = render_setup(&templates),
        command = REPORT_COMMAND,
        report = render_report(&templates),
        logic = render_logic(logic),
        delay = POLL_DELAY_MS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sensors::KNOWN_SENSORS;

    #[test]
    fn test_every_known_sensor_has_template() {
        for id in KNOWN_SENSORS {
            assert!(template_for(id).is_some(), "missing template for {}", id);
        }
    }

    #[test]
    fn test_single_temperature_sensor() {
        let sketch = render(&SensorSet::from_ids(["temperature"]), "// comment");

        let init_comments = sketch
            .lines()
            .filter(|l| l.trim() == "// Temperature sensor on A0")
            .count();
        assert_eq!(init_comments, 1);

        assert!(sketch.contains(r#"Serial.print("\"temp\":" + String(analogRead(A0)));"#));
        assert_eq!(sketch.matches(" + String(").count(), 1);
        assert!(sketch.lines().any(|l| l.trim() == "// comment"));
        assert!(sketch.contains("delay(100);"));
        assert!(sketch.contains("Serial.begin(9600);"));
    }

    #[test]
    fn test_report_has_no_trailing_comma() {
        let sketch = render(&SensorSet::from_ids(["temperature", "light", "motion"]), "");

        assert!(sketch.contains(r#"Serial.print("\"temp\":" + String(analogRead(A0)));"#));
        assert!(sketch.contains(r#"Serial.print(",\"light\":" + String(analogRead(A1)));"#));
        assert!(sketch.contains(r#"Serial.print(",\"motion\":" + String(digitalRead(2)));"#));
        assert!(!sketch.contains(r#",");"#));
    }

    #[test]
    fn test_emission_follows_insertion_order() {
        let sketch = render(&SensorSet::from_ids(["sound", "temperature"]), "");
        let sound = sketch.find(r#"\"sound\""#).unwrap();
        let temp = sketch.find(r#"\"temp\""#).unwrap();
        assert!(sound < temp);
    }

    #[test]
    fn test_empty_sensor_set_reports_status() {
        let sketch = render(&SensorSet::new(), "");
        assert!(sketch.contains(r#"\"status\":\"no_sensors\""#));
        assert!(sketch.contains("// No sensors configured"));
        assert!(!sketch.contains(" + String("));
    }

    #[test]
    fn test_unknown_sensors_are_skipped() {
        let sketch = render(&SensorSet::from_ids(["barometer", "light", "lidar"]), "");
        assert!(!sketch.contains("barometer"));
        assert!(!sketch.contains("lidar"));
        // The first known sensor gets no leading separator
        assert!(sketch.contains(r#"Serial.print("\"light\":" + String(analogRead(A1)));"#));
    }

    #[test]
    fn test_only_unknown_sensors_reports_status() {
        let sketch = render(&SensorSet::from_ids(["barometer"]), "");
        assert!(sketch.contains(r#"\"status\":\"no_sensors\""#));
    }

    #[test]
    fn test_empty_logic_uses_placeholder() {
        let sketch = render(&SensorSet::from_ids(["light"]), "   ");
        assert!(sketch.contains(NO_LOGIC));
    }

    #[test]
    fn test_multiline_logic_inserted_after_report() {
        let logic = "if (analogRead(A1) > 500) {\n  digitalWrite(13, HIGH);\n}";
        let sketch = render(&SensorSet::from_ids(["light"]), logic);

        let report_end = sketch.find(r#"Serial.println("}");"#).unwrap();
        let logic_pos = sketch.find("if (analogRead(A1) > 500) {").unwrap();
        let delay_pos = sketch.find("delay(100);").unwrap();
        assert!(report_end < logic_pos && logic_pos < delay_pos);
        assert!(sketch.contains("digitalWrite(13, HIGH);"));
    }

    #[test]
    fn test_entry_sections_present() {
        let sketch = render(&SensorSet::new(), "");
        assert!(sketch.starts_with("void setup() {"));
        assert!(sketch.contains("void loop() {"));
        assert!(sketch.contains(r#"indexOf("READ")"#));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_sensors() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec(
                prop_oneof![
                    prop::sample::select(KNOWN_SENSORS.to_vec()).prop_map(String::from),
                    "[a-z]{3,8}",
                ],
                0..6,
            )
        }

        proptest! {
            // Property: rendering is pure
            #[test]
            fn prop_render_is_deterministic(ids in arb_sensors(), logic in "[ -~]{0,40}") {
                let sensors = SensorSet::from_ids(&ids);
                prop_assert_eq!(render(&sensors, &logic), render(&sensors, &logic));
            }

            // Property: one report field per known sensor, never an empty object
            #[test]
            fn prop_report_field_count(ids in arb_sensors()) {
                let sensors = SensorSet::from_ids(&ids);
                let sketch = render(&sensors, "");
                let known = sensors.iter().filter(|id| template_for(id).is_some()).count();

                let fields = sketch.lines().filter(|l| l.trim_start().starts_with("Serial.print(\"")
                    && l.contains("String(")).count();
                prop_assert_eq!(fields, known);
                if known == 0 {
                    prop_assert!(sketch.contains("no_sensors"));
                }
            }
        }
    }
}
