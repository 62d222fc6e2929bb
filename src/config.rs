//! Configuration loading for SketchLoop.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.sketchloop/config.toml`)
//! 3. User config (`~/.sketchloop/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! All configuration is optional. A session runs against a local suggestion
//! service and the first detected board when no config exists.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FailOpen, Result, SketchError};
use crate::util::read_to_string_limited;

/// Directory name used for project and user configuration.
pub const CONFIG_DIR_NAME: &str = ".sketchloop";

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Suggestion service settings.
    pub model: ModelConfig,
    /// Board and toolchain settings.
    pub device: DeviceConfig,
    /// Loop pacing and retention.
    pub exploration: ExplorationConfig,
    /// Where versions, training entries and the session log live.
    pub storage: StorageConfig,
}

/// Suggestion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the chat-completions compatible endpoint.
    pub base_url: String,
    pub model: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    pub analysis_temperature: f32,
    pub plan_temperature: f32,
    /// Parse attempts per request before the fallback record is used.
    pub max_attempts: u32,
    pub timeout_seconds: u64,
    /// Number of recent samples shown in prompts (clamped to 3..=5).
    pub history_window: usize,
}

impl ModelConfig {
    pub fn is_valid_max_attempts(value: u32) -> bool {
        value >= 1
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            api_key: None,
            analysis_temperature: 0.7,
            plan_temperature: 0.8,
            max_attempts: 3,
            timeout_seconds: 60,
            history_window: 5,
        }
    }
}

/// Board and toolchain configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device path; autodetected when absent.
    pub port: Option<String>,
    /// Fully qualified board name passed to the toolchain.
    pub fqbn: String,
    pub cli_path: String,
    /// Pause after a successful upload, in milliseconds.
    pub settle_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            fqbn: "arduino:avr:uno".to_string(),
            cli_path: "arduino-cli".to_string(),
            settle_ms: 3000,
        }
    }
}

/// Loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Sensors active in the first build.
    pub initial_sensors: Vec<String>,
    /// Wait between cycles.
    pub idle_interval_seconds: u64,
    /// Telemetry samples kept in memory.
    pub history_retention: usize,
    /// Training is requested every N regenerations.
    pub training_interval: u64,
    /// Operator acknowledgement timeout; absent waits forever.
    pub ack_timeout_seconds: Option<u64>,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl ExplorationConfig {
    pub fn is_valid_history_retention(value: usize) -> bool {
        value >= 1
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            initial_sensors: vec!["temperature".to_string()],
            idle_interval_seconds: 10,
            history_retention: 50,
            training_interval: 3,
            ack_timeout_seconds: None,
            max_cycles: None,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for all persisted state; defaults to `./.sketchloop`.
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration with full precedence chain.
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(_) => {
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration with a specific working directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Load config with fail-open behavior.
    pub fn load_fail_open() -> Self {
        let result: Result<Self> = Ok(Self::load());
        result.fail_open_default("loading config")
    }

    fn load_user_config() -> Option<Config> {
        let home = sketchloop_home()?;
        Self::load_optional(&home.join("config.toml"))
    }

    fn load_project_config(cwd: &Path) -> Option<Config> {
        Self::load_optional(&cwd.join(CONFIG_DIR_NAME).join("config.toml"))
    }

    /// Missing files are silent; malformed ones are reported and skipped.
    fn load_optional(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        Self::load_from_file(path)
            .map_err(|e| {
                eprintln!("Warning: ignoring {}: {}", path.display(), e);
                e
            })
            .ok()
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = read_to_string_limited(path)?;
        toml::from_str(&content).map_err(|e| SketchError::config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_string("SKETCHLOOP_BASE_URL") {
            self.model.base_url = val;
        }
        if let Some(val) = env_string("SKETCHLOOP_MODEL") {
            self.model.model = val;
        }
        if let Some(val) = env_string("SKETCHLOOP_API_KEY") {
            self.model.api_key = Some(val);
        }
        if let Some(n) = env_parse::<u32>("SKETCHLOOP_MAX_ATTEMPTS", self.model.max_attempts) {
            if ModelConfig::is_valid_max_attempts(n) {
                self.model.max_attempts = n;
            } else {
                eprintln!(
                    "Warning: Invalid SKETCHLOOP_MAX_ATTEMPTS value '{}'. \
                    Must be >= 1. Using '{}'.",
                    n, self.model.max_attempts
                );
            }
        }

        if let Some(val) = env_string("SKETCHLOOP_PORT") {
            self.device.port = Some(val);
        }
        if let Some(val) = env_string("SKETCHLOOP_FQBN") {
            self.device.fqbn = val;
        }

        if let Some(n) = env_parse::<u64>(
            "SKETCHLOOP_IDLE_SECONDS",
            self.exploration.idle_interval_seconds,
        ) {
            self.exploration.idle_interval_seconds = n;
        }
        if let Ok(val) = env::var("SKETCHLOOP_ACK_TIMEOUT") {
            match val.trim() {
                "" | "none" | "0" => self.exploration.ack_timeout_seconds = None,
                other => match other.parse::<u64>() {
                    Ok(n) => self.exploration.ack_timeout_seconds = Some(n),
                    Err(_) => eprintln!(
                        "Warning: Invalid SKETCHLOOP_ACK_TIMEOUT value '{}'. \
                        Expected seconds or 'none'. Ignoring.",
                        val
                    ),
                },
            }
        }

        if let Some(val) = env_string("SKETCHLOOP_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(val));
        }
    }

    /// Merge another config into this one.
    ///
    /// Values from `other` take precedence if they differ from defaults.
    /// A higher layer cannot reset a field back to its default value.
    fn merge(mut self, other: Config) -> Self {
        let default_model = ModelConfig::default();
        if other.model.base_url != default_model.base_url {
            self.model.base_url = other.model.base_url;
        }
        if other.model.model != default_model.model {
            self.model.model = other.model.model;
        }
        if other.model.api_key.is_some() {
            self.model.api_key = other.model.api_key;
        }
        if other.model.analysis_temperature != default_model.analysis_temperature {
            self.model.analysis_temperature = other.model.analysis_temperature;
        }
        if other.model.plan_temperature != default_model.plan_temperature {
            self.model.plan_temperature = other.model.plan_temperature;
        }
        if other.model.max_attempts != default_model.max_attempts
            && ModelConfig::is_valid_max_attempts(other.model.max_attempts)
        {
            self.model.max_attempts = other.model.max_attempts;
        }
        if other.model.timeout_seconds != default_model.timeout_seconds {
            self.model.timeout_seconds = other.model.timeout_seconds;
        }
        if other.model.history_window != default_model.history_window {
            self.model.history_window = other.model.history_window;
        }

        let default_device = DeviceConfig::default();
        if other.device.port.is_some() {
            self.device.port = other.device.port;
        }
        if other.device.fqbn != default_device.fqbn {
            self.device.fqbn = other.device.fqbn;
        }
        if other.device.cli_path != default_device.cli_path {
            self.device.cli_path = other.device.cli_path;
        }
        if other.device.settle_ms != default_device.settle_ms {
            self.device.settle_ms = other.device.settle_ms;
        }

        let default_exploration = ExplorationConfig::default();
        if other.exploration.initial_sensors != default_exploration.initial_sensors {
            self.exploration.initial_sensors = other.exploration.initial_sensors;
        }
        if other.exploration.idle_interval_seconds != default_exploration.idle_interval_seconds {
            self.exploration.idle_interval_seconds = other.exploration.idle_interval_seconds;
        }
        if other.exploration.history_retention != default_exploration.history_retention
            && ExplorationConfig::is_valid_history_retention(other.exploration.history_retention)
        {
            self.exploration.history_retention = other.exploration.history_retention;
        }
        if other.exploration.training_interval != default_exploration.training_interval {
            self.exploration.training_interval = other.exploration.training_interval;
        }
        if other.exploration.ack_timeout_seconds.is_some() {
            self.exploration.ack_timeout_seconds = other.exploration.ack_timeout_seconds;
        }
        if other.exploration.max_cycles.is_some() {
            self.exploration.max_cycles = other.exploration.max_cycles;
        }

        if other.storage.data_dir.is_some() {
            self.storage.data_dir = other.storage.data_dir;
        }

        self
    }

    /// Root for persisted state, resolved against `cwd` when relative.
    pub fn data_dir(&self, cwd: &Path) -> PathBuf {
        match &self.storage.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => cwd.join(CONFIG_DIR_NAME),
        }
    }

    /// Returns `<data_dir>/firmware_versions`.
    pub fn firmware_dir(&self, cwd: &Path) -> PathBuf {
        self.data_dir(cwd).join("firmware_versions")
    }

    /// Returns `<data_dir>/training_data`.
    pub fn training_dir(&self, cwd: &Path) -> PathBuf {
        self.data_dir(cwd).join("training_data")
    }

    /// Returns `<data_dir>/exploration_log.json`.
    pub fn session_log_path(&self, cwd: &Path) -> PathBuf {
        self.data_dir(cwd).join("exploration_log.json")
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str, current: impl Display) -> Option<T>
where
    T: FromStr,
{
    let val = env::var(name).ok()?;
    match val.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            eprintln!(
                "Warning: Invalid {} value '{}'. Expected a non-negative integer. Using '{}'.",
                name, val, current
            );
            None
        }
    }
}

/// Get the SketchLoop home directory.
///
/// Checks `SKETCHLOOP_HOME` first, then falls back to `~/.sketchloop`.
/// An empty `SKETCHLOOP_HOME` is ignored.
pub fn sketchloop_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("SKETCHLOOP_HOME") {
        if home.is_empty() {
            tracing::warn!("SKETCHLOOP_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("SKETCHLOOP_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(CONFIG_DIR_NAME));
    }

    let fallback_path = fallback_home();
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback_path.display()
    );
    Some(fallback_path)
}

#[cfg(unix)]
fn fallback_home() -> PathBuf {
    use std::os::unix::fs::MetadataExt;
    let uid = std::fs::metadata("/").map(|m| m.uid()).unwrap_or(0);
    PathBuf::from(format!("/tmp/sketchloop-{}", uid))
}

#[cfg(not(unix))]
fn fallback_home() -> PathBuf {
    std::env::temp_dir().join("sketchloop")
}

/// Get the crash log path.
///
/// Returns `<sketchloop_home>/crash.log`.
pub fn crash_log_path() -> Option<PathBuf> {
    sketchloop_home().map(|h| h.join("crash.log"))
}
