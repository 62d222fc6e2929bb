//! Firmware generation: rendering sketches and screening model-authored code.

pub mod safety;
pub mod template;

pub use safety::{is_full_firmware, sanitize, validate_full_firmware};
pub use template::{render, template_for, SensorTemplate, NO_LOGIC, REPORT_COMMAND};
