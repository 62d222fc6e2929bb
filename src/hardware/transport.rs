//! Device link.
//!
//! The firmware answers the `READ` command token with one line holding a JSON
//! object. Line settings (9600 8N1, raw) are applied with `stty` on a
//! best-effort basis; a reader thread turns the byte stream into lines so a
//! silent device costs one read timeout instead of a hung loop.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::core::context::Telemetry;
use crate::firmware::template::{BAUD_RATE, REPORT_COMMAND};

/// Device link as seen by the controller.
pub trait Transport: Send {
    /// Open the link. Failure is fatal to the session.
    fn connect(&mut self) -> bool;

    /// Request one report. Any failure yields empty telemetry.
    fn read_telemetry(&mut self) -> Telemetry;

    fn disconnect(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> bool {
        (**self).connect()
    }

    fn read_telemetry(&mut self) -> Telemetry {
        (**self).read_telemetry()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

/// Decode one report line (`{"temp":512,"light":300}`).
///
/// Text around the braces is ignored; anything that is not an object yields
/// empty telemetry.
pub fn parse_report_line(line: &str) -> Telemetry {
    let line = line.trim();
    let (Some(start), Some(end)) = (line.find('{'), line.rfind('}')) else {
        return Telemetry::new();
    };
    if end < start {
        return Telemetry::new();
    }

    match serde_json::from_str::<Value>(&line[start..=end]) {
        Ok(Value::Object(object)) => object.into_iter().collect(),
        Ok(_) => Telemetry::new(),
        Err(e) => {
            tracing::debug!("undecodable report line {:?}: {}", line, e);
            Telemetry::new()
        }
    }
}

/// Device node prefixes that usually belong to USB microcontroller boards.
const PORT_PREFIXES: &[&str] = &["ttyACM", "ttyUSB", "cu.usbmodem", "cu.usbserial"];

/// First device node under `/dev` that looks like a board.
pub fn detect_port() -> Option<PathBuf> {
    detect_port_in(Path::new("/dev"))
}

fn detect_port_in(dev: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dev)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|name| {
                    let name = name.to_string_lossy();
                    PORT_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
                })
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

struct Link {
    writer: File,
    lines: Receiver<String>,
}

/// Line-oriented link over a serial device node.
pub struct DeviceTransport {
    path: PathBuf,
    reset_delay: Duration,
    read_timeout: Duration,
    link: Option<Link>,
}

impl DeviceTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reset_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            link: None,
        }
    }

    /// Pause after opening while the board resets.
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn configure_line(&self) {
        let flag = if cfg!(target_os = "linux") { "-F" } else { "-f" };
        let result = Command::new("stty")
            .arg(flag)
            .arg(&self.path)
            .args([BAUD_RATE.to_string().as_str(), "raw", "-echo"])
            .output();
        match result {
            Ok(output) if output.status.success() => {}
            Ok(output) => tracing::debug!(
                "stty failed for {}: {}",
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => tracing::debug!("stty unavailable: {}", e),
        }
    }

    fn spawn_reader(file: File) -> Receiver<String> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(file);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        rx
    }
}

impl Transport for DeviceTransport {
    fn connect(&mut self) -> bool {
        self.configure_line();

        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .and_then(|file| Ok((file.try_clone()?, file)));

        match opened {
            Ok((reader, writer)) => {
                thread::sleep(self.reset_delay);
                self.link = Some(Link {
                    writer,
                    lines: Self::spawn_reader(reader),
                });
                tracing::info!(port = %self.path.display(), "connected to device");
                true
            }
            Err(e) => {
                tracing::error!(port = %self.path.display(), "connection failed: {}", e);
                false
            }
        }
    }

    fn read_telemetry(&mut self) -> Telemetry {
        let Some(link) = self.link.as_mut() else {
            return Telemetry::new();
        };

        // Drop replies that arrived after an earlier timeout
        while link.lines.try_recv().is_ok() {}

        let command = format!("{}\n", REPORT_COMMAND);
        if let Err(e) = link
            .writer
            .write_all(command.as_bytes())
            .and_then(|_| link.writer.flush())
        {
            tracing::warn!("failed to send report command: {}", e);
            return Telemetry::new();
        }

        match link.lines.recv_timeout(self.read_timeout) {
            Ok(line) => parse_report_line(&line),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("no report within {:?}", self.read_timeout);
                Telemetry::new()
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("device stream closed");
                Telemetry::new()
            }
        }
    }

    fn disconnect(&mut self) {
        if self.link.take().is_some() {
            tracing::info!(port = %self.path.display(), "disconnected from device");
        }
    }
}
