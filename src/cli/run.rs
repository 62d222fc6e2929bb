//! Run command for SketchLoop.
//!
//! Wires the configured device, model service and stores into an
//! exploration session and runs it until stopped or a cycle limit is hit.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::controller::{
    AckOutcome, Acknowledger, AutoAcknowledger, Collaborators, CycleReport,
    ExplorationController, LineAcknowledger,
};
use crate::core::{Provenance, SensorSet};
use crate::error::Result;
use crate::hardware::{detect_port, ArduinoCliFlasher, DeviceTransport, Flasher, NoopFlasher};
use crate::model::ModelClient;
use crate::storage::{FileVersionStore, TrainingLog, VersionStore};

/// Options for the run command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Stop after this many cycles.
    pub cycles: Option<u64>,
    /// Device port; overrides config and auto-detection.
    pub port: Option<PathBuf>,
    /// Save builds without compiling or uploading them.
    pub no_flash: bool,
    /// Accept hardware-change instructions without waiting for input.
    pub auto_ack: bool,
}

/// Condensed view of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub readings: usize,
    pub analysis: String,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_sensors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<AckOutcome>,
}

impl From<&CycleReport> for CycleSummary {
    fn from(report: &CycleReport) -> Self {
        Self {
            cycle: report.cycle,
            readings: report.telemetry.len(),
            analysis: report.analysis.analysis.clone(),
            provenance: report.analysis.provenance,
            added_sensors: report.added_sensors.clone(),
            version: report.build.as_ref().map(|b| b.version),
            instruction: report.instruction.clone(),
            ack: report.ack,
        }
    }
}

impl CycleSummary {
    fn line(&self) -> String {
        let mut line = format!(
            "cycle {}: {} reading(s), [{}] {}",
            self.cycle, self.readings, self.provenance, self.analysis
        );
        if !self.added_sensors.is_empty() {
            line.push_str(&format!(" | added {}", self.added_sensors.join(", ")));
        }
        if let Some(version) = self.version {
            line.push_str(&format!(" | built v{}", version));
        }
        line
    }
}

/// Output format for the run command.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub success: bool,
    /// The device link failed or no port was available.
    pub link_failure: bool,
    pub total_cycles: u64,
    pub current_version: u64,
    pub sensors: SensorSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_log: Option<PathBuf>,
    pub cycles: Vec<CycleSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutput {
    fn failure(error: impl Into<String>, link_failure: bool, cycles: Vec<CycleSummary>) -> Self {
        Self {
            success: false,
            link_failure,
            total_cycles: cycles.last().map(|c| c.cycle).unwrap_or(0),
            current_version: 0,
            sensors: SensorSet::default(),
            session_log: None,
            cycles,
            error: Some(error.into()),
        }
    }
}

/// The run command implementation.
pub struct RunCommand {
    config: Config,
    cwd: PathBuf,
    stop: Arc<AtomicBool>,
}

impl RunCommand {
    pub fn new(config: Config, cwd: impl Into<PathBuf>) -> Self {
        Self {
            config,
            cwd: cwd.into(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `stop` to end the session, e.g. from a Ctrl-C handler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Port precedence: option, then config, then auto-detection.
    fn resolve_port(&self, options: &RunOptions) -> Option<PathBuf> {
        options
            .port
            .clone()
            .or_else(|| self.config.device.port.as_ref().map(PathBuf::from))
            .or_else(detect_port)
    }

    fn build_controller(
        &self,
        options: &RunOptions,
        port: &Path,
    ) -> Result<ExplorationController<FileVersionStore>> {
        let model = ModelClient::from_config(&self.config.model)?;
        let store = FileVersionStore::open(self.config.firmware_dir(&self.cwd))?;
        let training = TrainingLog::open(self.config.training_dir(&self.cwd))?;

        let flasher: Box<dyn Flasher> = if options.no_flash {
            Box::new(NoopFlasher)
        } else {
            Box::new(
                ArduinoCliFlasher::from_config(&self.config.device)
                    .with_port(Some(port.display().to_string())),
            )
        };
        let acknowledger: Box<dyn Acknowledger> = if options.auto_ack {
            Box::new(AutoAcknowledger)
        } else {
            Box::new(LineAcknowledger::stdin())
        };

        let mut exploration = self.config.exploration.clone();
        if options.cycles.is_some() {
            exploration.max_cycles = options.cycles;
        }

        let collaborators = Collaborators {
            transport: Box::new(DeviceTransport::new(port)),
            flasher,
            acknowledger,
        };
        Ok(
            ExplorationController::new(collaborators, model, store, training, exploration)
                .with_session_log(self.config.session_log_path(&self.cwd))
                .with_stop_flag(Arc::clone(&self.stop)),
        )
    }

    pub fn run(&self, options: &RunOptions) -> RunOutput {
        let Some(port) = self.resolve_port(options) else {
            return RunOutput::failure("No device port configured or detected", true, Vec::new());
        };
        tracing::info!(port = %port.display(), "starting exploration session");

        let mut controller = match self.build_controller(options, &port) {
            Ok(controller) => controller,
            Err(e) => return RunOutput::failure(e.to_string(), false, Vec::new()),
        };

        let progress = !options.quiet && !options.json;
        let mut cycles = Vec::new();
        let result = controller.run_with(|report| {
            let summary = CycleSummary::from(report);
            if progress {
                println!("{}", summary.line());
            }
            cycles.push(summary);
        });

        match result {
            Ok(summary) => RunOutput {
                success: true,
                link_failure: false,
                total_cycles: summary.total_cycles,
                current_version: summary.current_version,
                sensors: summary.sensors,
                session_log: summary.session_log,
                cycles,
                error: None,
            },
            Err(e) => {
                tracing::error!("exploration session failed: {}", e);
                let mut output = RunOutput::failure(e.to_string(), e.is_fatal(), cycles);
                output.current_version = controller.store().current_version();
                output.sensors = controller.context().sensors().clone();
                output
            }
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &RunOutput, options: &RunOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &RunOutput) -> String {
        let mut lines = Vec::new();
        if output.success {
            lines.push(format!(
                "Session complete: {} cycle(s), firmware v{}",
                output.total_cycles, output.current_version
            ));
        } else {
            lines.push(format!(
                "Session failed: {}",
                output.error.as_deref().unwrap_or("unknown error")
            ));
        }
        if !output.sensors.is_empty() {
            lines.push(format!("Sensors: {}", output.sensors));
        }
        if let Some(path) = &output.session_log {
            lines.push(format!("Session log: {}", path.display()));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}
