//! Device collaborators: the telemetry link and the firmware flasher.

pub mod flasher;
pub mod transport;

pub use flasher::{ArduinoCliFlasher, Flasher, NoopFlasher};
pub use transport::{detect_port, parse_report_line, DeviceTransport, Transport};
