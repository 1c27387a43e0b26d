//! Pipeline configuration.
//!
//! Every field has a default, so a JSON file only needs to name the values it
//! changes:
//!
//! ```json
//! { "sensor": "dvs32", "map_size": 32, "decay_every": 20 }
//! ```

use crate::accumulator::AccumulationLaw;
use crate::clock::ClockParams;
use crate::codec::SourceKind;
use crate::layout::{AddressLayout, SensorModel};
use crate::sync::SyncParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete set of pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bytes of packed input read per cycle
    pub chunk_size: usize,
    /// Side length of each channel's map
    pub map_size: usize,
    pub sensor: SensorModel,
    pub source: SourceKind,
    /// Intensity removed from every cell per forgetting step
    pub decay_step: i32,
    /// Forget every N cycles; 0 forgets on demand only
    pub decay_every: u64,
    pub packed_unit: i32,
    pub packed_clip: i32,
    pub framed_unit: i32,
    pub depth_window: u32,
    pub wrap_threshold: f64,
    pub stuck_threshold: u32,
    pub stuck_check_every: u64,
    pub resync_every: u64,
    pub counter_ratio: f64,
    pub interval_factor: f64,
    pub stereo: bool,
    /// Longest wait for the input slot lock, in microseconds
    pub handoff_wait_us: u64,
    /// Period of the driving loop, in microseconds
    pub cycle_period_us: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32_768,
            map_size: 128,
            sensor: SensorModel::Dvs128,
            source: SourceKind::Packed,
            decay_step: 50,
            decay_every: 0,
            packed_unit: 127,
            packed_clip: 127,
            framed_unit: 50,
            depth_window: 10,
            wrap_threshold: 4_294_967_268.0,
            stuck_threshold: 10,
            stuck_check_every: 100,
            resync_every: 1,
            counter_ratio: 1.0,
            interval_factor: 1.0,
            stereo: true,
            handoff_wait_us: 500,
            cycle_period_us: 5_000,
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises the configuration as pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.chunk_size == 0 {
            return invalid("chunk_size must be positive");
        }
        if self.map_size == 0 || self.map_size > u16::MAX as usize {
            return invalid("map_size must be between 1 and 65535");
        }
        if self.decay_step < 0 {
            return invalid("decay_step must not be negative");
        }
        if self.packed_unit <= 0 || self.packed_clip <= 0 || self.framed_unit <= 0 {
            return invalid("accumulation units and clip must be positive");
        }
        if self.depth_window == 0 {
            return invalid("depth_window must be positive");
        }
        if !(self.wrap_threshold > 0.0) {
            return invalid("wrap_threshold must be positive");
        }
        if self.stuck_threshold == 0 || self.stuck_check_every == 0 || self.resync_every == 0 {
            return invalid("cadences and thresholds must be positive");
        }
        if !(self.counter_ratio > 0.0) || !(self.interval_factor > 0.0) {
            return invalid("counter_ratio and interval_factor must be positive");
        }
        if self.cycle_period_us == 0 {
            return invalid("cycle_period_us must be positive");
        }
        self.layout().check().map_err(ConfigError::Invalid)
    }

    pub fn layout(&self) -> AddressLayout {
        self.sensor.layout()
    }

    /// Accumulation law for input of `kind`.
    pub fn law(&self, kind: SourceKind) -> AccumulationLaw {
        match kind {
            SourceKind::Packed => AccumulationLaw::Clipped {
                unit: self.packed_unit,
                clip: self.packed_clip,
            },
            SourceKind::Framed => AccumulationLaw::Unclipped {
                unit: self.framed_unit,
            },
        }
    }

    pub fn clock_params(&self) -> ClockParams {
        ClockParams {
            interval_factor: self.interval_factor,
            counter_ratio: self.counter_ratio,
            depth_window: self.depth_window,
            wrap_threshold: self.wrap_threshold,
        }
    }

    pub fn sync_params(&self) -> SyncParams {
        SyncParams {
            resync_every: self.resync_every,
            stuck_check_every: self.stuck_check_every,
            stuck_threshold: self.stuck_threshold,
            stereo: self.stereo,
        }
    }

    pub fn handoff_wait(&self) -> Duration {
        Duration::from_micros(self.handoff_wait_us)
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_micros(self.cycle_period_us)
    }
}
