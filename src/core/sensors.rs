//! Ordered, duplicate-free set of sensor identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sensor identifiers the firmware templates know how to drive.
///
/// The set is open: identifiers outside this list are accepted everywhere and
/// simply produce no firmware code until a template entry exists.
pub const KNOWN_SENSORS: &[&str] = &[
    "temperature",
    "light",
    "motion",
    "humidity",
    "sound",
    "button",
    "potentiometer",
    "gas",
];

/// Normalize a sensor identifier as suggested by the model.
///
/// Lowercases, trims, folds whitespace/hyphens to underscores and drops a
/// trailing "sensor" word ("Light Sensor" → "light").
pub fn normalize_sensor_id(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let folded: String = lowered
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    match folded.strip_suffix("_sensor") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => folded,
    }
}

/// Ordered set of sensor identifiers.
///
/// Insertion order determines code emission order; duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SensorSet {
    ids: Vec<String>,
}

impl SensorSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from identifiers, keeping the first occurrence of each.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for id in ids {
            set.insert(id.as_ref());
        }
        set
    }

    /// Insert an identifier. Returns false for duplicates and blank input.
    pub fn insert(&mut self, raw: &str) -> bool {
        let id = normalize_sensor_id(raw);
        if id.is_empty() || self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Insert every identifier not yet present, returning the ones added.
    pub fn extend_new<I, S>(&mut self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = Vec::new();
        for id in ids {
            if self.insert(id.as_ref()) {
                if let Some(last) = self.ids.last() {
                    added.push(last.clone());
                }
            }
        }
        added
    }

    /// Identifiers from `ids` that this set does not contain yet.
    pub fn missing<I, S>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut missing: Vec<String> = Vec::new();
        for raw in ids {
            let id = normalize_sensor_id(raw.as_ref());
            if !id.is_empty() && !self.ids.contains(&id) && !missing.contains(&id) {
                missing.push(id);
            }
        }
        missing
    }

    /// Check whether the set contains an identifier.
    pub fn contains(&self, raw: &str) -> bool {
        self.ids.contains(&normalize_sensor_id(raw))
    }

    /// Iterate identifiers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Identifiers as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl From<Vec<String>> for SensorSet {
    fn from(ids: Vec<String>) -> Self {
        Self::from_ids(ids)
    }
}

impl From<SensorSet> for Vec<String> {
    fn from(set: SensorSet) -> Self {
        set.ids
    }
}

impl fmt::Display for SensorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ids.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", self.ids.join(", "))
        }
    }
}
