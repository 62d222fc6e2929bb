//! Model client with bounded retries and a local fallback.
//!
//! `request_analysis` and `request_plan` are total: service errors, bad
//! statuses and unparseable replies are absorbed here and resolved to a
//! fallback record marked with [`Provenance::Fallback`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::ModelConfig;
use crate::core::context::{ExplorationContext, TelemetrySample};
use crate::core::records::{
    AnalysisRecord, ExplorationPlanRecord, HardwareChange, Provenance, StructuredRecord,
};
use crate::core::sensors::SensorSet;
use crate::error::{FailOpen, Result};
use crate::model::parser;
use crate::model::prompt;
use crate::model::service::{CompletionRequest, CompletionService, HttpCompletionService};
use crate::storage::training::TrainingEntry;

/// Prefix of every fallback analysis and pattern text.
pub const FALLBACK_MARKER: &str = "[FALLBACK]";

/// One row of the fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackCandidate {
    pub sensor: &'static str,
    pub pin: &'static str,
    pub instruction: &'static str,
}

pub const FALLBACK_TABLE: &[FallbackCandidate] = &[
    FallbackCandidate {
        sensor: "temperature",
        pin: "A0",
        instruction: "Connect a temperature sensor to A0",
    },
    FallbackCandidate {
        sensor: "light",
        pin: "A1",
        instruction: "Connect a light sensor (photoresistor) to A1",
    },
    FallbackCandidate {
        sensor: "motion",
        pin: "D2",
        instruction: "Connect a PIR motion sensor output to digital pin 2",
    },
    FallbackCandidate {
        sensor: "humidity",
        pin: "A2",
        instruction: "Connect a humidity sensor to A2",
    },
    FallbackCandidate {
        sensor: "sound",
        pin: "A3",
        instruction: "Connect a sound sensor module to A3",
    },
    FallbackCandidate {
        sensor: "button",
        pin: "D3",
        instruction: "Connect a push button between digital pin 3 and GND",
    },
];

/// Firmware should be regenerated when the analysis proposes a sensor that is
/// not active yet, or when an evolution cycle was explicitly requested.
pub fn should_update_firmware(
    analysis: &AnalysisRecord,
    sensors: &SensorSet,
    forced: bool,
) -> bool {
    forced || !sensors.missing(&analysis.suggested_sensors).is_empty()
}

/// Issues prompts to the suggestion service and validates the replies.
pub struct ModelClient {
    service: Box<dyn CompletionService>,
    config: ModelConfig,
    rng: StdRng,
}

impl ModelClient {
    pub fn new(service: Box<dyn CompletionService>, config: ModelConfig) -> Self {
        Self {
            service,
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Client backed by the HTTP chat-completion service.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let service = HttpCompletionService::new(config)?;
        Ok(Self::new(Box::new(service), config.clone()))
    }

    /// Make hint and fallback selection reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Up to `max_attempts` sequential requests, each parsed independently.
    fn request_record<R: StructuredRecord>(&self, prompt: &str, temperature: f32) -> Option<R> {
        let request = CompletionRequest::prompt(prompt, temperature);
        let attempts = self.attempts();

        for attempt in 1..=attempts {
            let reply = match self.service.complete(&request) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(
                        kind = R::KIND,
                        attempt,
                        attempts,
                        "suggestion service failed: {}",
                        e
                    );
                    continue;
                }
            };

            match parser::parse::<R>(&reply) {
                Ok(record) => return Some(record),
                Err(failure) => {
                    tracing::warn!(kind = R::KIND, attempt, attempts, "{}", failure);
                }
            }
        }

        None
    }

    /// Analyze the latest telemetry. Never fails.
    pub fn request_analysis(&mut self, context: &ExplorationContext) -> AnalysisRecord {
        let hint = prompt::pick_inspiration(&mut self.rng);
        let text = prompt::analysis_prompt(context, self.config.history_window, hint);

        match self.request_record::<AnalysisRecord>(&text, self.config.analysis_temperature) {
            Some(record) => record,
            None => {
                let record = self.fallback_analysis(context.sensors());
                tracing::info!(sensor = ?record.suggested_sensors, "using fallback analysis");
                record
            }
        }
    }

    /// Plan the next exploration step. Never fails.
    pub fn request_plan(
        &mut self,
        sensors: &SensorSet,
        history: &[TelemetrySample],
    ) -> ExplorationPlanRecord {
        let hint = prompt::pick_inspiration(&mut self.rng);
        let text = prompt::plan_prompt(sensors, history, self.config.history_window, hint);

        match self.request_record::<ExplorationPlanRecord>(&text, self.config.plan_temperature) {
            Some(record) => record,
            None => {
                tracing::info!("using fallback plan");
                self.fallback_plan(sensors)
            }
        }
    }

    /// Send recent training entries to the service. Advisory only.
    pub fn train_iteration(&self, entries: &[TrainingEntry]) -> bool {
        if entries.is_empty() {
            return false;
        }

        let request = CompletionRequest::prompt(
            prompt::training_prompt(entries),
            self.config.analysis_temperature,
        );
        self.service
            .complete(&request)
            .map(|_| true)
            .fail_open_with("training iteration", false)
    }

    /// Prefer a sensor that is not active yet.
    fn pick_candidate(&mut self, sensors: &SensorSet) -> FallbackCandidate {
        let fresh: Vec<FallbackCandidate> = FALLBACK_TABLE
            .iter()
            .filter(|c| !sensors.contains(c.sensor))
            .copied()
            .collect();
        let pool = if fresh.is_empty() { FALLBACK_TABLE } else { &fresh[..] };

        pool.choose(&mut self.rng)
            .copied()
            .unwrap_or(FALLBACK_TABLE[0])
    }

    fn fallback_analysis(&mut self, sensors: &SensorSet) -> AnalysisRecord {
        let candidate = self.pick_candidate(sensors);
        AnalysisRecord {
            analysis: format!(
                "{} No usable reply from the suggestion service; continuing with a {} sensor.",
                FALLBACK_MARKER, candidate.sensor
            ),
            suggested_sensors: vec![candidate.sensor.to_string()],
            suggested_logic: Some("// Basic sensor reading".to_string()),
            exploration_question: format!(
                "How does the {} reading change over time?",
                candidate.sensor
            ),
            user_instructions: candidate.instruction.to_string(),
            provenance: Provenance::Fallback,
        }
    }

    fn fallback_plan(&mut self, sensors: &SensorSet) -> ExplorationPlanRecord {
        let candidate = self.pick_candidate(sensors);
        ExplorationPlanRecord {
            pattern_analysis: format!("{} Collecting initial data", FALLBACK_MARKER),
            next_exploration: format!(
                "Add a {} sensor for environmental monitoring",
                candidate.sensor
            ),
            hardware_changes: HardwareChange::Typed {
                sensor_kind: candidate.sensor.to_string(),
                pin: candidate.pin.to_string(),
            },
            expected_outcome: "Better understanding of the environment".to_string(),
            provenance: Provenance::Fallback,
        }
    }
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("model", &self.config.model)
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}
