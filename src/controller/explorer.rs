//! The exploration loop.
//!
//! One thread drives every cycle: read telemetry, ask for an analysis, maybe
//! build and flash new firmware, ask for a plan, and wait for the operator
//! when the plan names a hardware change. Only a failed device link ends a
//! session early; model, safety, storage and flashing faults are logged and
//! the loop carries on with the firmware already on the board.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ExplorationConfig;
use crate::controller::ack::{AckOutcome, Acknowledger};
use crate::controller::dashboard::{Dashboard, DashboardHandle};
use crate::core::context::{ExplorationContext, Telemetry};
use crate::core::records::{AnalysisRecord, ExplorationPlanRecord, Provenance};
use crate::core::sensors::SensorSet;
use crate::core::state::{LoopState, LoopStateMachine};
use crate::error::{FailOpen, Result, SketchError};
use crate::firmware::safety::{is_full_firmware, sanitize, validate_full_firmware};
use crate::firmware::template::{render, NO_LOGIC};
use crate::hardware::{Flasher, Transport};
use crate::model::client::{should_update_firmware, ModelClient};
use crate::storage::session_log::SessionLog;
use crate::storage::training::{TrainingEntry, TrainingLog};
use crate::storage::traits::{BuildMetadata, VersionStore};

/// Reason recorded for the build flashed right after connecting.
pub const INITIAL_REASON: &str = "Initial setup with basic sensors";

/// Training entries sent with each training request.
const TRAINING_BATCH: usize = 5;

/// Granularity of stop and trigger checks during the idle wait.
const IDLE_SLICE: Duration = Duration::from_millis(250);

/// External collaborators the controller drives.
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub flasher: Box<dyn Flasher>,
    pub acknowledger: Box<dyn Acknowledger>,
}

/// Result of one build-and-flash attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutcome {
    pub version: u64,
    pub reason: String,
    pub flashed: bool,
    /// `Some` when this build triggered a training request.
    pub trained: Option<bool>,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub telemetry: Telemetry,
    pub analysis: AnalysisRecord,
    pub added_sensors: Vec<String>,
    pub build: Option<BuildOutcome>,
    /// Set when a regeneration was wanted but held back by a pending
    /// hardware change.
    pub build_deferred: bool,
    pub plan: ExplorationPlanRecord,
    pub instruction: Option<String>,
    pub ack: Option<AckOutcome>,
}

/// Totals for a finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub total_cycles: u64,
    pub current_version: u64,
    pub sensors: SensorSet,
    pub session_log: Option<PathBuf>,
}

/// Drives exploration cycles against a device.
pub struct ExplorationController<V: VersionStore> {
    transport: Box<dyn Transport>,
    flasher: Box<dyn Flasher>,
    acknowledger: Box<dyn Acknowledger>,
    model: ModelClient,
    store: V,
    training: TrainingLog,
    context: ExplorationContext,
    machine: LoopStateMachine,
    dashboard: Dashboard,
    stop: Arc<AtomicBool>,
    config: ExplorationConfig,
    session_log_path: Option<PathBuf>,
    regenerations: u64,
    pending_change: Option<(String, Provenance)>,
    evolution_pending: bool,
}

impl<V: VersionStore> ExplorationController<V> {
    pub fn new(
        collaborators: Collaborators,
        model: ModelClient,
        store: V,
        training: TrainingLog,
        config: ExplorationConfig,
    ) -> Self {
        let sensors = SensorSet::from_ids(&config.initial_sensors);
        Self {
            transport: collaborators.transport,
            flasher: collaborators.flasher,
            acknowledger: collaborators.acknowledger,
            model,
            store,
            training,
            context: ExplorationContext::new(sensors, config.history_retention),
            machine: LoopStateMachine::new(),
            dashboard: Dashboard::new(),
            stop: Arc::new(AtomicBool::new(false)),
            config,
            session_log_path: None,
            regenerations: 0,
            pending_change: None,
            evolution_pending: false,
        }
    }

    /// Write the session log to `path` when the session stops.
    pub fn with_session_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_log_path = Some(path.into());
        self
    }

    /// Share an externally owned stop flag, e.g. one raised by a signal
    /// handler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag that ends the session at the next check point when raised.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn dashboard(&self) -> DashboardHandle {
        self.dashboard.handle()
    }

    pub fn context(&self) -> &ExplorationContext {
        &self.context
    }

    pub fn state(&self) -> LoopState {
        self.machine.state()
    }

    pub fn store(&self) -> &V {
        &self.store
    }

    /// Hardware change still waiting for the operator, if any.
    pub fn pending_change(&self) -> Option<&str> {
        self.pending_change.as_ref().map(|(text, _)| text.as_str())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn advance(&mut self, next: LoopState) -> Result<()> {
        self.machine.advance(next, self.context.cycle())?;
        self.dashboard.publish_state(next, self.context.cycle());
        Ok(())
    }

    /// Connect and flash the baseline build.
    ///
    /// A failed connection is fatal; the controller moves straight to
    /// `Stopped`.
    pub fn start(&mut self) -> Result<()> {
        if !self.transport.connect() {
            self.machine.stop(0);
            self.dashboard.publish_state(LoopState::Stopped, 0);
            return Err(SketchError::transport("could not connect to device"));
        }
        self.advance(LoopState::Connected)?;

        let sketch = render(self.context.sensors(), NO_LOGIC);
        let build = BuildMetadata::new(self.context.sensors().clone(), INITIAL_REASON, 0);
        self.build_and_flash(&sketch, build)?;
        Ok(())
    }

    /// Run one full cycle. The controller must be started.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        let cycle = self.context.begin_cycle();
        self.advance(LoopState::Analyzing)?;
        tracing::info!(cycle, "exploration cycle");

        let telemetry = self.transport.read_telemetry();
        if telemetry.is_empty() {
            tracing::warn!(cycle, "no telemetry this cycle");
        }
        self.context.record(telemetry.clone());
        let analysis = self.model.request_analysis(&self.context);
        tracing::info!(
            cycle,
            provenance = %analysis.provenance,
            "analysis: {}",
            analysis.analysis
        );

        self.advance(LoopState::MaybeFlashing)?;
        let forced = self.evolution_pending || self.dashboard.take_evolution_request();
        let mut added_sensors = Vec::new();
        let mut build = None;
        let mut build_deferred = false;

        if should_update_firmware(&analysis, self.context.sensors(), forced) {
            if let Some((pending, _)) = &self.pending_change {
                tracing::warn!(
                    cycle,
                    pending = %pending,
                    "hardware change not acknowledged, holding back new firmware"
                );
                self.evolution_pending = forced;
                build_deferred = true;
            } else {
                let mut sensors = self.context.sensors().clone();
                let added = sensors.extend_new(&analysis.suggested_sensors);
                build = self.regenerate(&telemetry, &analysis, sensors, &added)?;
                if build.is_some() {
                    added_sensors = added;
                }
                // A failed save keeps a requested evolution for the next cycle
                self.evolution_pending = forced && build.is_none();
            }
        }

        self.advance(LoopState::Planning)?;
        let plan = self
            .model
            .request_plan(self.context.sensors(), self.context.history());
        tracing::info!(cycle, "next exploration: {}", plan.next_exploration);

        // An unacknowledged change is surfaced again before any new one
        let surfaced = self.pending_change.clone().or_else(|| {
            plan.hardware_change()
                .map(|change| (change.describe(), plan.provenance))
        });
        if let (Some((pending, _)), Some(change)) =
            (&self.pending_change, plan.hardware_change())
        {
            tracing::info!(
                pending = %pending,
                "holding back new hardware change until the pending one is done: {}",
                change.describe()
            );
        }

        let instruction = surfaced.as_ref().map(|(text, _)| text.clone());
        let ack = match surfaced {
            Some((text, provenance)) => Some(self.await_hardware_change(&text, provenance)?),
            None => None,
        };

        Ok(CycleReport {
            cycle,
            telemetry,
            analysis,
            added_sensors,
            build,
            build_deferred,
            plan,
            instruction,
            ack,
        })
    }

    fn await_hardware_change(&mut self, text: &str, provenance: Provenance) -> Result<AckOutcome> {
        self.advance(LoopState::AwaitingHardwareChange)?;
        self.pending_change = Some((text.to_string(), provenance));
        self.dashboard.publish_instruction(
            text,
            self.context.cycle(),
            self.context.sensors(),
            provenance,
        );

        let timeout = self.config.ack_timeout_seconds.map(Duration::from_secs);
        let outcome = self.acknowledger.acknowledge(text, timeout, &self.stop);
        match outcome {
            AckOutcome::Acknowledged => {
                tracing::info!("hardware change acknowledged");
                self.pending_change = None;
                self.dashboard.complete_instruction();
            }
            AckOutcome::TimedOut => {
                tracing::warn!("hardware change not acknowledged in time, keeping it pending");
            }
            AckOutcome::Cancelled => {
                tracing::info!("hardware change prompt cancelled");
                self.stop.store(true, Ordering::SeqCst);
            }
        }
        Ok(outcome)
    }

    /// Build new firmware for `sensors` from an analysis. Returns `None`
    /// when the version could not be saved; the active sensor set and the
    /// training log only change once the version is stored.
    fn regenerate(
        &mut self,
        telemetry: &Telemetry,
        analysis: &AnalysisRecord,
        sensors: SensorSet,
        added: &[String],
    ) -> Result<Option<BuildOutcome>> {
        let logic = analysis.suggested_logic.as_deref().unwrap_or_default();
        let sketch = if is_full_firmware(logic) {
            validate_full_firmware(logic, &sensors)
        } else {
            render(&sensors, &sanitize(logic))
        };

        let reason = if added.is_empty() {
            "Evolution requested".to_string()
        } else {
            format!("Added sensors: {}", added.join(", "))
        };
        tracing::info!(reason = %reason, "regenerating firmware");

        let build = BuildMetadata::new(sensors.clone(), &reason, self.context.cycle()).evolved();
        let Some(mut outcome) = self.build_and_flash(&sketch, build)? else {
            return Ok(None);
        };
        *self.context.sensors_mut() = sensors;

        let entry = TrainingEntry::new(telemetry.clone(), analysis.clone(), &sketch, &reason);
        self.training
            .append(&entry)
            .map(|_| ())
            .fail_open_default("saving training entry");

        self.regenerations += 1;
        let interval = self.config.training_interval;
        if interval > 0 && self.regenerations % interval == 0 {
            outcome.trained = Some(self.train());
        }
        Ok(Some(outcome))
    }

    /// Persist and flash one build. A save failure skips flashing and
    /// leaves the counter alone; only a lost device link is an error.
    fn build_and_flash(
        &mut self,
        sketch: &str,
        build: BuildMetadata,
    ) -> Result<Option<BuildOutcome>> {
        let reason = build.reason.clone();
        let handle = match self.store.save(sketch, build) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(reason = %reason, "could not save firmware version: {}", e);
                return Ok(None);
            }
        };
        self.dashboard.publish_firmware(handle.version, sketch);

        // The toolchain needs the port to itself
        self.transport.disconnect();
        let flashed = self.flasher.flash(&handle.sketch_dir);
        if flashed {
            tracing::info!(version = handle.version, "firmware flashed");
        } else {
            tracing::warn!(
                version = handle.version,
                "flashing failed, previous firmware stays active"
            );
        }
        if !self.transport.connect() {
            return Err(SketchError::transport(
                "could not reconnect to device after flashing",
            ));
        }

        Ok(Some(BuildOutcome {
            version: handle.version,
            reason,
            flashed,
            trained: None,
        }))
    }

    fn train(&mut self) -> bool {
        let summary = self
            .training
            .summary(TRAINING_BATCH)
            .fail_open_default("reading training log");
        let trained = self.model.train_iteration(&summary.latest_entries);
        tracing::info!(
            trained,
            total_entries = summary.total_entries,
            "training iteration"
        );
        trained
    }

    /// Sleep for the idle interval, waking early on stop or an evolution
    /// request.
    fn idle_wait(&mut self) {
        let deadline = Instant::now() + Duration::from_secs(self.config.idle_interval_seconds);
        loop {
            if self.stopped() {
                return;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            if self.dashboard.wait_evolution_request(left.min(IDLE_SLICE)) {
                tracing::info!("evolution request received, starting next cycle");
                self.evolution_pending = true;
                return;
            }
        }
    }

    fn cycle_limit_reached(&self) -> bool {
        self.config
            .max_cycles
            .map(|max| self.context.cycle() >= max)
            .unwrap_or(false)
    }

    /// Release the device and write the session log.
    pub fn shutdown(&mut self) -> Option<PathBuf> {
        let cycle = self.context.cycle();
        self.machine.stop(cycle);
        self.dashboard.publish_state(LoopState::Stopped, cycle);
        self.transport.disconnect();

        let path = self.session_log_path.clone()?;
        let versions = self
            .store
            .history()
            .fail_open_default("reading version history");
        let log = SessionLog::capture(&self.context, self.config.history_retention, versions);
        match log.write(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::error!("could not write session log: {}", e);
                None
            }
        }
    }

    /// Run a whole session, calling `on_cycle` after every cycle.
    pub fn run_with<F>(&mut self, mut on_cycle: F) -> Result<SessionSummary>
    where
        F: FnMut(&CycleReport),
    {
        self.start()?;

        let result = self.explore(&mut on_cycle);
        let session_log = self.shutdown();
        result?;

        Ok(SessionSummary {
            total_cycles: self.context.cycle(),
            current_version: self.store.current_version(),
            sensors: self.context.sensors().clone(),
            session_log,
        })
    }

    pub fn run(&mut self) -> Result<SessionSummary> {
        self.run_with(|_| {})
    }

    fn explore(&mut self, on_cycle: &mut dyn FnMut(&CycleReport)) -> Result<()> {
        while !self.stopped() && !self.cycle_limit_reached() {
            let report = self.run_cycle()?;
            on_cycle(&report);

            if self.stopped() || self.cycle_limit_reached() {
                break;
            }
            self.idle_wait();
        }
        if self.stopped() {
            tracing::info!("exploration stopped by operator");
        }
        Ok(())
    }
}

impl<V: VersionStore> std::fmt::Debug for ExplorationController<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorationController")
            .field("state", &self.machine.state())
            .field("cycle", &self.context.cycle())
            .field("sensors", self.context.sensors())
            .field("regenerations", &self.regenerations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::model::client::test_support::{ScriptedService, VALID_ANALYSIS, VALID_PLAN};
    use crate::model::client::FALLBACK_MARKER;
    use crate::storage::file::FileVersionStore;
    use crate::storage::memory::MemoryVersionStore;
    use crate::storage::traits::{FirmwareVersion, VersionHandle, VersionMetadata};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct LinkLog {
        connects: usize,
        disconnects: usize,
        reads: usize,
    }

    #[derive(Clone, Default)]
    struct MockTransport {
        log: Arc<Mutex<LinkLog>>,
        refuse: bool,
    }

    impl Transport for MockTransport {
        fn connect(&mut self) -> bool {
            self.log.lock().unwrap().connects += 1;
            !self.refuse
        }

        fn read_telemetry(&mut self) -> Telemetry {
            let mut log = self.log.lock().unwrap();
            log.reads += 1;
            let mut data = Telemetry::new();
            data.insert("temp".to_string(), json!(500 + log.reads));
            data
        }

        fn disconnect(&mut self) {
            self.log.lock().unwrap().disconnects += 1;
        }
    }

    #[derive(Clone)]
    struct MockFlasher {
        result: bool,
        flashed: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl MockFlasher {
        fn new(result: bool) -> Self {
            Self {
                result,
                flashed: Arc::default(),
            }
        }
    }

    impl Flasher for MockFlasher {
        fn flash(&mut self, sketch_dir: &Path) -> bool {
            self.flashed.lock().unwrap().push(sketch_dir.to_path_buf());
            self.result
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedAck {
        outcomes: Arc<Mutex<VecDeque<AckOutcome>>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedAck {
        fn new(outcomes: &[AckOutcome]) -> Self {
            Self {
                outcomes: Arc::new(Mutex::new(outcomes.iter().copied().collect())),
                prompts: Arc::default(),
            }
        }
    }

    impl Acknowledger for ScriptedAck {
        fn acknowledge(
            &mut self,
            instruction: &str,
            _timeout: Option<Duration>,
            _stop: &AtomicBool,
        ) -> AckOutcome {
            self.prompts.lock().unwrap().push(instruction.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(AckOutcome::Acknowledged)
        }
    }

    /// Memory store whose `fail_on`-th save fails.
    struct FlakyStore {
        inner: MemoryVersionStore,
        saves: u64,
        fail_on: u64,
    }

    impl FlakyStore {
        fn failing_save(fail_on: u64) -> Self {
            Self {
                inner: MemoryVersionStore::new(),
                saves: 0,
                fail_on,
            }
        }
    }

    impl VersionStore for FlakyStore {
        fn save(&mut self, sketch: &str, build: BuildMetadata) -> Result<VersionHandle> {
            self.saves += 1;
            if self.saves == self.fail_on {
                return Err(SketchError::storage(
                    "firmware_versions",
                    std::io::Error::other("disk full"),
                ));
            }
            self.inner.save(sketch, build)
        }

        fn current_version(&self) -> u64 {
            self.inner.current_version()
        }

        fn get(&self, version: u64) -> Result<Option<FirmwareVersion>> {
            self.inner.get(version)
        }

        fn history(&self) -> Result<Vec<VersionMetadata>> {
            self.inner.history()
        }
    }

    struct Rig {
        transport: MockTransport,
        flasher: MockFlasher,
        ack: ScriptedAck,
        service: ScriptedService,
        dir: TempDir,
    }

    impl Rig {
        fn new(service: ScriptedService) -> Self {
            Self {
                transport: MockTransport::default(),
                flasher: MockFlasher::new(true),
                ack: ScriptedAck::default(),
                service,
                dir: TempDir::new().unwrap(),
            }
        }

        fn config() -> ExplorationConfig {
            ExplorationConfig {
                idle_interval_seconds: 0,
                max_cycles: Some(1),
                ..ExplorationConfig::default()
            }
        }

        fn controller_with<V: VersionStore>(
            &self,
            store: V,
            config: ExplorationConfig,
        ) -> ExplorationController<V> {
            let model = ModelClient::new(Box::new(self.service.clone()), ModelConfig::default())
                .with_seed(7);
            let training = TrainingLog::open(self.dir.path().join("training_data")).unwrap();
            ExplorationController::new(
                Collaborators {
                    transport: Box::new(self.transport.clone()),
                    flasher: Box::new(self.flasher.clone()),
                    acknowledger: Box::new(self.ack.clone()),
                },
                model,
                store,
                training,
                config,
            )
        }

        fn controller(&self) -> ExplorationController<MemoryVersionStore> {
            self.controller_with(MemoryVersionStore::new(), Self::config())
        }
    }

    const NO_CHANGE_PLAN: &str = r#"{"pattern_analysis": "flat", "next_exploration": "keep watching", "hardware_changes": ""}"#;
    const STEADY_ANALYSIS: &str = r#"{"analysis": "steady", "suggested_sensors": ["temperature"], "user_instructions": "none"}"#;

    #[test]
    fn test_connect_failure_is_fatal() {
        let mut rig = Rig::new(ScriptedService::failing());
        rig.transport.refuse = true;
        let mut controller = rig.controller();

        let err = controller.run().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(controller.state(), LoopState::Stopped);
        assert_eq!(controller.store().current_version(), 0);
        assert_eq!(rig.service.calls(), 0);
    }

    #[test]
    fn test_start_flashes_initial_build() {
        let rig = Rig::new(ScriptedService::failing());
        let mut controller = rig.controller();
        controller.start().unwrap();

        assert_eq!(controller.state(), LoopState::Connected);
        let v1 = controller.store().get(1).unwrap().unwrap();
        assert_eq!(v1.metadata.reason, INITIAL_REASON);
        assert_eq!(v1.metadata.ai_evolved, None);
        assert!(v1.sketch_source.contains(r#"\"temp\":"#));
        assert_eq!(rig.flasher.flashed.lock().unwrap().len(), 1);
        assert_eq!(controller.dashboard().firmware().unwrap().0, 1);
    }

    #[test]
    fn test_cycle_adds_suggested_sensor() {
        let rig = Rig::new(ScriptedService::texts([VALID_ANALYSIS, VALID_PLAN]));
        let mut controller = rig.controller();
        controller.start().unwrap();

        let report = controller.run_cycle().unwrap();

        assert_eq!(report.cycle, 1);
        assert_eq!(report.added_sensors, vec!["light"]);
        let build = report.build.unwrap();
        assert_eq!(build.version, 2);
        assert!(build.flashed);
        assert_eq!(build.reason, "Added sensors: light");
        assert_eq!(build.trained, None);

        let v2 = controller.store().get(2).unwrap().unwrap();
        assert_eq!(v2.metadata.ai_evolved, Some(true));
        assert_eq!(v2.metadata.sensors.as_slice(), ["temperature", "light"]);
        assert!(v2.sketch_source.contains("digitalWrite(13, HIGH)"));

        assert_eq!(controller.context().history().len(), 1);
        assert_eq!(controller.state(), LoopState::AwaitingHardwareChange);
        assert_eq!(report.ack, Some(AckOutcome::Acknowledged));
        assert!(controller.pending_change().is_none());
        let entries = rig.dir.path().join("training_data").read_dir().unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_no_new_sensor_no_build() {
        let rig = Rig::new(ScriptedService::texts([STEADY_ANALYSIS, NO_CHANGE_PLAN]));
        let mut controller = rig.controller();
        controller.start().unwrap();

        let report = controller.run_cycle().unwrap();
        assert!(report.build.is_none());
        assert!(report.instruction.is_none());
        assert!(report.ack.is_none());
        assert_eq!(controller.store().current_version(), 1);
        assert_eq!(controller.state(), LoopState::Planning);
        assert!(rig.ack.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_service_outage_uses_fallbacks() {
        let rig = Rig::new(ScriptedService::failing());
        let mut controller = rig.controller();
        controller.start().unwrap();

        let report = controller.run_cycle().unwrap();
        assert!(report.analysis.analysis.contains(FALLBACK_MARKER));
        assert!(report.analysis.provenance.is_fallback());
        assert!(report.build.is_some());
        assert!(report.plan.provenance.is_fallback());

        let current = controller.dashboard().current_instruction().unwrap();
        assert_eq!(current.provenance, Provenance::Fallback);
        assert!(current.completed);
    }

    #[test]
    fn test_unsafe_logic_is_replaced() {
        let analysis = r#"{"analysis": "a", "suggested_sensors": ["motion"], "suggested_logic": "system(\"rm -rf /\");", "user_instructions": "PIR on D2"}"#;
        let rig = Rig::new(ScriptedService::texts([analysis, NO_CHANGE_PLAN]));
        let mut controller = rig.controller();
        controller.start().unwrap();

        let report = controller.run_cycle().unwrap();
        let version = report.build.unwrap().version;
        let sketch = controller.store().get(version).unwrap().unwrap().sketch_source;
        assert!(!sketch.contains("system("));
        assert!(sketch.contains("Unsafe code removed"));
    }

    #[test]
    fn test_full_firmware_suggestion_is_validated() {
        let analysis = r#"{"analysis": "a", "suggested_sensors": ["light"], "suggested_logic": "void setup() {\n  pinMode(13, OUTPUT);\n}\nvoid loop() {\n  digitalWrite(13, HIGH);\n  delay(500);\n}", "user_instructions": "LDR on A1"}"#;
        let rig = Rig::new(ScriptedService::texts([analysis, NO_CHANGE_PLAN]));
        let mut controller = rig.controller();
        controller.start().unwrap();

        let report = controller.run_cycle().unwrap();
        let sketch = controller
            .store()
            .get(report.build.unwrap().version)
            .unwrap()
            .unwrap()
            .sketch_source;
        assert!(sketch.contains("Serial.begin(9600)"));
        assert!(sketch.contains("digitalWrite(13, HIGH)"));
    }

    #[test]
    fn test_flash_failure_continues() {
        let mut rig = Rig::new(ScriptedService::texts([VALID_ANALYSIS, NO_CHANGE_PLAN]));
        rig.flasher = MockFlasher::new(false);
        let mut controller = rig.controller();
        controller.start().unwrap();

        let report = controller.run_cycle().unwrap();
        let build = report.build.unwrap();
        assert!(!build.flashed);
        assert_eq!(controller.store().current_version(), 2);
        assert_eq!(controller.state(), LoopState::Planning);
    }

    #[test]
    fn test_lost_link_after_flash_is_fatal() {
        let rig = Rig::new(ScriptedService::texts([VALID_ANALYSIS, NO_CHANGE_PLAN]));
        let mut controller = rig.controller();
        controller.start().unwrap();

        // Refuse every later connect
        let mut transport = rig.transport.clone();
        transport.refuse = true;
        controller.transport = Box::new(transport);

        let err = controller.run_cycle().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_timed_out_ack_holds_back_flashing() {
        let mut rig = Rig::new(ScriptedService::texts([
            STEADY_ANALYSIS,
            VALID_PLAN,
            VALID_ANALYSIS,
            NO_CHANGE_PLAN,
            VALID_ANALYSIS,
            NO_CHANGE_PLAN,
        ]));
        rig.ack = ScriptedAck::new(&[AckOutcome::TimedOut, AckOutcome::TimedOut]);
        let mut controller = rig.controller();
        controller.start().unwrap();

        let first = controller.run_cycle().unwrap();
        assert_eq!(first.ack, Some(AckOutcome::TimedOut));
        assert_eq!(controller.pending_change(), Some("Connect PIR to D2; Share GND"));

        // New sensor suggested while the change is pending: no build
        let second = controller.run_cycle().unwrap();
        assert!(second.build.is_none());
        assert!(second.build_deferred);
        assert_eq!(controller.store().current_version(), 1);
        // The pending change is surfaced again
        assert_eq!(
            second.instruction.as_deref(),
            Some("Connect PIR to D2; Share GND")
        );

        // Third attempt: change still pending, scripted ack now accepts
        let third = controller.run_cycle().unwrap();
        assert!(third.build.is_none());
        assert_eq!(third.ack, Some(AckOutcome::Acknowledged));
        assert!(controller.pending_change().is_none());
    }

    #[test]
    fn test_failed_save_keeps_sensor_pending() {
        let rig = Rig::new(ScriptedService::texts([
            VALID_ANALYSIS,
            NO_CHANGE_PLAN,
            VALID_ANALYSIS,
            NO_CHANGE_PLAN,
        ]));
        // Save 1 is the initial build; save 2 fails
        let mut controller = rig.controller_with(FlakyStore::failing_save(2), Rig::config());
        controller.start().unwrap();
        let training_dir = rig.dir.path().join("training_data");

        let first = controller.run_cycle().unwrap();
        assert!(first.build.is_none());
        assert!(first.added_sensors.is_empty());
        assert_eq!(controller.context().sensors().as_slice(), ["temperature"]);
        assert_eq!(controller.store().current_version(), 1);
        assert_eq!(training_dir.read_dir().unwrap().count(), 0);

        // The sensor is still missing, so the next cycle builds it
        let second = controller.run_cycle().unwrap();
        assert_eq!(second.added_sensors, vec!["light"]);
        assert_eq!(second.build.unwrap().version, 2);
        assert_eq!(
            controller.context().sensors().as_slice(),
            ["temperature", "light"]
        );
        let latest = controller.store().latest().unwrap().unwrap();
        assert_eq!(latest.metadata.sensors.as_slice(), ["temperature", "light"]);
        assert_eq!(training_dir.read_dir().unwrap().count(), 1);
    }

    #[test]
    fn test_pending_change_surfaces_before_new_one() {
        let buzzer_plan = r#"{"pattern_analysis": "quiet", "next_exploration": "sound", "hardware_changes": "Connect buzzer to D8"}"#;
        let mut rig = Rig::new(ScriptedService::texts([
            STEADY_ANALYSIS,
            VALID_PLAN,
            STEADY_ANALYSIS,
            buzzer_plan,
        ]));
        rig.ack = ScriptedAck::new(&[AckOutcome::TimedOut, AckOutcome::Acknowledged]);
        let mut controller = rig.controller();
        controller.start().unwrap();

        let first = controller.run_cycle().unwrap();
        assert_eq!(first.ack, Some(AckOutcome::TimedOut));

        let second = controller.run_cycle().unwrap();
        assert_eq!(
            second.instruction.as_deref(),
            Some("Connect PIR to D2; Share GND")
        );
        assert_eq!(second.ack, Some(AckOutcome::Acknowledged));
        assert!(controller.pending_change().is_none());

        let prompts = rig.ack.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| p == "Connect PIR to D2; Share GND"));
        let current = controller.dashboard().current_instruction().unwrap();
        assert_eq!(current.instruction, "Connect PIR to D2; Share GND");
        assert!(current.completed);
    }

    #[test]
    fn test_cancelled_ack_stops_session() {
        let mut rig = Rig::new(ScriptedService::texts([STEADY_ANALYSIS, VALID_PLAN]));
        rig.ack = ScriptedAck::new(&[AckOutcome::Cancelled]);
        let config = ExplorationConfig {
            max_cycles: None,
            ..Rig::config()
        };
        let mut controller = rig.controller_with(MemoryVersionStore::new(), config);

        let summary = controller.run().unwrap();
        assert_eq!(summary.total_cycles, 1);
        assert_eq!(controller.state(), LoopState::Stopped);
    }

    #[test]
    fn test_training_every_third_regeneration() {
        let mut replies = Vec::new();
        for sensor in ["light", "motion", "humidity"] {
            replies.push(format!(
                r#"{{"analysis": "a", "suggested_sensors": ["{}"], "user_instructions": "wire it"}}"#,
                sensor
            ));
            if sensor == "humidity" {
                // The training call happens before the third plan request
                replies.push("trained".to_string());
            }
            replies.push(NO_CHANGE_PLAN.to_string());
        }
        let rig = Rig::new(ScriptedService::texts(replies));
        let mut controller = rig.controller();
        controller.start().unwrap();

        let first = controller.run_cycle().unwrap();
        let second = controller.run_cycle().unwrap();
        let third = controller.run_cycle().unwrap();

        assert_eq!(first.build.unwrap().trained, None);
        assert_eq!(second.build.unwrap().trained, None);
        assert_eq!(third.build.unwrap().trained, Some(true));
        assert_eq!(rig.service.calls(), 7);
        assert!(rig.service.prompts()[5].contains("exploration examples"));
    }

    #[test]
    fn test_evolution_request_forces_build() {
        let rig = Rig::new(ScriptedService::texts([STEADY_ANALYSIS, NO_CHANGE_PLAN]));
        let mut controller = rig.controller();
        controller.start().unwrap();

        assert!(controller.dashboard().request_evolution());
        let report = controller.run_cycle().unwrap();

        let build = report.build.unwrap();
        assert_eq!(build.reason, "Evolution requested");
        assert!(report.added_sensors.is_empty());
        assert_eq!(controller.store().current_version(), 2);
    }

    #[test]
    fn test_idle_wait_wakes_on_evolution_request() {
        let rig = Rig::new(ScriptedService::failing());
        let config = ExplorationConfig {
            idle_interval_seconds: 30,
            ..Rig::config()
        };
        let mut controller = rig.controller_with(MemoryVersionStore::new(), config);
        let handle = controller.dashboard();

        assert!(handle.request_evolution());
        let started = Instant::now();
        controller.idle_wait();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(controller.evolution_pending);
    }

    #[test]
    fn test_idle_wait_returns_on_stop() {
        let rig = Rig::new(ScriptedService::failing());
        let config = ExplorationConfig {
            idle_interval_seconds: 30,
            ..Rig::config()
        };
        let mut controller = rig.controller_with(MemoryVersionStore::new(), config);
        controller.stop_flag().store(true, Ordering::SeqCst);

        let started = Instant::now();
        controller.idle_wait();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_writes_session_log() {
        let rig = Rig::new(ScriptedService::texts([
            VALID_ANALYSIS,
            NO_CHANGE_PLAN,
            STEADY_ANALYSIS,
            NO_CHANGE_PLAN,
        ]));
        let config = ExplorationConfig {
            max_cycles: Some(2),
            ..Rig::config()
        };
        let store = FileVersionStore::open(rig.dir.path().join("firmware_versions")).unwrap();
        let log_path = rig.dir.path().join("exploration_log.json");
        let mut controller = rig
            .controller_with(store, config)
            .with_session_log(&log_path);

        let mut cycles = Vec::new();
        let summary = controller.run_with(|report| cycles.push(report.cycle)).unwrap();

        assert_eq!(cycles, vec![1, 2]);
        assert_eq!(summary.total_cycles, 2);
        assert_eq!(summary.current_version, 2);
        assert_eq!(summary.sensors.as_slice(), ["temperature", "light"]);
        assert_eq!(summary.session_log.as_deref(), Some(log_path.as_path()));

        let log = SessionLog::read(&log_path).unwrap();
        assert_eq!(log.total_cycles, 2);
        assert_eq!(log.firmware_versions.len(), 2);
        assert_eq!(log.data_history.len(), 2);

        let link = rig.transport.log.lock().unwrap();
        assert_eq!(link.reads, 2);
        assert_eq!(link.connects, link.disconnects);
        assert_eq!(controller.state(), LoopState::Stopped);
    }

    #[test]
    fn test_stop_before_first_cycle() {
        let rig = Rig::new(ScriptedService::failing());
        let config = ExplorationConfig {
            max_cycles: None,
            ..Rig::config()
        };
        let mut controller = rig.controller_with(MemoryVersionStore::new(), config);
        controller.stop_flag().store(true, Ordering::SeqCst);

        let summary = controller.run().unwrap();
        assert_eq!(summary.total_cycles, 0);
        assert_eq!(summary.current_version, 1);
        assert!(summary.session_log.is_none());
    }
}
