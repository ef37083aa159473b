use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::net::{Stage, Weight};

/// Batch firing stops after this many rounds even if transitions stay enabled.
pub const MAX_BATCH_ITERATIONS: usize = 100;
/// Number of top-priority candidates examined per batch round.
pub const CANDIDATE_WINDOW: usize = 3;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_zones")]
    pub zones: usize,
    #[serde(default = "default_reservoir_level")]
    pub reservoir_level: Weight,
    /// Tokens a pump start draws from the reservoir.
    #[serde(default = "default_pump_draw")]
    pub pump_draw: Weight,
    /// Initial tank level of the two-zone controller.
    #[serde(default = "default_controller_tank")]
    pub controller_tank: Weight,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Stage delays, expressed in time units of `time_unit_ms`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,
    #[serde(default = "default_start_to_active")]
    pub start_to_active: u64,
    #[serde(default = "default_active_to_stop")]
    pub active_to_stop: u64,
    #[serde(default = "default_stop_to_drying")]
    pub stop_to_drying: u64,
    #[serde(default = "default_auto_period")]
    pub auto_period: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BatchConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_candidate_window")]
    pub candidate_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            zones: default_zones(),
            reservoir_level: default_reservoir_level(),
            pump_draw: default_pump_draw(),
            controller_tank: default_controller_tank(),
            timing: TimingConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            time_unit_ms: default_time_unit_ms(),
            start_to_active: default_start_to_active(),
            active_to_stop: default_active_to_stop(),
            stop_to_drying: default_stop_to_drying(),
            auto_period: default_auto_period(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            candidate_window: default_candidate_window(),
        }
    }
}

impl TimingConfig {
    fn units(&self, units: u64) -> Duration {
        Duration::from_millis(self.time_unit_ms.saturating_mul(units))
    }

    /// Delay before the follow-up of a successful `stage` fire, if it has one.
    pub fn delay_after(&self, stage: Stage) -> Option<Duration> {
        let units = match stage {
            Stage::Start => self.start_to_active,
            Stage::Active => self.active_to_stop,
            Stage::Stop => self.stop_to_drying,
            Stage::Drying | Stage::Other => return None,
        };
        Some(self.units(units))
    }

    pub fn auto_period(&self) -> Duration {
        self.units(self.auto_period.max(1))
    }
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.zones > 0, "zones must be at least 1");
        ensure!(self.pump_draw > 0, "pump_draw must be at least 1");
        ensure!(self.timing.time_unit_ms > 0, "timing.time_unit_ms must be positive");
        ensure!(
            self.batch.candidate_window > 0,
            "batch.candidate_window must be at least 1"
        );
        Ok(())
    }
}

fn default_zones() -> usize {
    1
}

fn default_reservoir_level() -> Weight {
    50
}

fn default_pump_draw() -> Weight {
    10
}

fn default_controller_tank() -> Weight {
    2
}

fn default_time_unit_ms() -> u64 {
    1000
}

fn default_start_to_active() -> u64 {
    5
}

fn default_active_to_stop() -> u64 {
    5
}

fn default_stop_to_drying() -> u64 {
    10
}

fn default_auto_period() -> u64 {
    1
}

fn default_max_iterations() -> usize {
    MAX_BATCH_ITERATIONS
}

fn default_candidate_window() -> usize {
    CANDIDATE_WINDOW
}
