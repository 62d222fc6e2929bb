//! Firmware flashing.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use crate::config::DeviceConfig;

/// Compiles and uploads a sketch directory. Failure is never fatal.
pub trait Flasher: Send {
    fn flash(&mut self, sketch_dir: &Path) -> bool;
}

impl<T: Flasher + ?Sized> Flasher for Box<T> {
    fn flash(&mut self, sketch_dir: &Path) -> bool {
        (**self).flash(sketch_dir)
    }
}

/// Flashes through the `arduino-cli` toolchain: `compile` then `upload`.
#[derive(Debug, Clone)]
pub struct ArduinoCliFlasher {
    cli_path: PathBuf,
    fqbn: String,
    port: Option<String>,
    settle: Duration,
}

impl ArduinoCliFlasher {
    pub fn new(cli_path: impl Into<PathBuf>, fqbn: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            fqbn: fqbn.into(),
            port: None,
            settle: Duration::from_secs(3),
        }
    }

    /// Build from the `[device]` config section.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(&config.cli_path, &config.fqbn)
            .with_port(config.port.clone())
            .with_settle(Duration::from_millis(config.settle_ms))
    }

    pub fn with_port(mut self, port: Option<String>) -> Self {
        self.port = port;
        self
    }

    /// Pause after a successful upload while the board restarts.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn run(&self, step: &str, args: &[&str], sketch_dir: &Path) -> bool {
        let output = Command::new(&self.cli_path)
            .args(args)
            .arg(sketch_dir)
            .output();

        match output {
            Ok(output) if output.status.success() => {
                tracing::debug!(step, sketch = %sketch_dir.display(), "toolchain step succeeded");
                true
            }
            Ok(output) => {
                tracing::warn!(
                    step,
                    status = %output.status,
                    "toolchain step failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    step,
                    cli = %self.cli_path.display(),
                    "could not run toolchain: {}",
                    e
                );
                false
            }
        }
    }
}

impl Flasher for ArduinoCliFlasher {
    fn flash(&mut self, sketch_dir: &Path) -> bool {
        if !self.run("compile", &["compile", "--fqbn", &self.fqbn], sketch_dir) {
            return false;
        }

        let Some(port) = self.port.as_deref() else {
            tracing::warn!("no device port configured, skipping upload");
            return false;
        };
        if !self.run("upload", &["upload", "-p", port, "--fqbn", &self.fqbn], sketch_dir) {
            return false;
        }

        thread::sleep(self.settle);
        tracing::info!(sketch = %sketch_dir.display(), "firmware uploaded");
        true
    }
}

/// Flasher for runs without a toolchain; every build counts as flashed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFlasher;

impl Flasher for NoopFlasher {
    fn flash(&mut self, sketch_dir: &Path) -> bool {
        tracing::info!(sketch = %sketch_dir.display(), "flashing disabled, build saved only");
        true
    }
}
