//! System configuration parameters
//!
//! All tunable parameters for the heating loop.  Values are loaded from a
//! JSON file by the host binary, or taken from [`RegulationConfig::default`].

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on the chimney temperature history (fixed-capacity storage).
pub const MAX_HISTORY_CAPACITY: usize = 32;
/// Upper bound on the flow sample window (fixed-capacity storage).
pub const MAX_FLOW_WINDOW: usize = 32;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegulationConfig {
    pub chimney: ChimneyConfig,
    pub valve: ValveConfig,
    pub flow: FlowConfig,
    pub accumulator: AccumulatorConfig,
    pub regulation: RegulationLoopConfig,
}

/// Chimney classifier and fault-recovery parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimneyConfig {
    /// Below this (°C) the fire is considered out.
    pub considered_fire_threshold_c: f64,
    /// Above this (°C) the chimney is at full power.
    pub max_temperature_c: f64,
    /// Pump starts circulating above this chimney temperature (°C).
    pub min_temperature_pump_threshold_c: f64,
    /// Pump reaches full speed at this chimney temperature (°C).
    pub max_temperature_pump_threshold_c: f64,
    /// Number of samples kept for the trend average.
    pub history_size: usize,
    /// Consecutive sensor power-cycles allowed per fault episode.
    pub max_reset_count: u32,
    /// Sensor supply off-time during a power-cycle (milliseconds).
    pub sensor_power_cycle_ms: u32,
}

impl Default for ChimneyConfig {
    fn default() -> Self {
        Self {
            considered_fire_threshold_c: 30.0,
            max_temperature_c: 85.0,
            min_temperature_pump_threshold_c: 45.0,
            max_temperature_pump_threshold_c: 85.0,
            history_size: 10,
            max_reset_count: 10,
            sensor_power_cycle_ms: 300,
        }
    }
}

/// Three-way valve timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValveConfig {
    /// Full closed <-> open traverse time (seconds).
    pub opening_duration_secs: u32,
    /// Extra drive time added to the initialisation run (seconds).
    pub init_grace_secs: u32,
    /// Sequence tick period (milliseconds).
    pub tick_ms: u32,
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self {
            opening_duration_secs: 120,
            init_grace_secs: 5,
            tick_ms: 500,
        }
    }
}

/// Pulse flow meter parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Minimum time between accepted edges (milliseconds).
    pub debounce_ms: u32,
    /// Sliding window capacity used for the average rate.
    pub window_samples: usize,
    /// Meter reading at installation (litres).
    pub initial_value: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            window_samples: 10,
            initial_value: 0,
        }
    }
}

/// Accumulator temperature bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    pub min_temp_c: f64,
    pub max_temp_c: f64,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            min_temp_c: 20.0,
            max_temp_c: 85.0,
        }
    }
}

/// Periodic regulation loop parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulationLoopConfig {
    /// Controller tick period (milliseconds).
    pub period_ms: u32,
    /// Lowest non-zero pump speed (0-100 %).
    pub min_pump_speed_percent: u8,
}

impl Default for RegulationLoopConfig {
    fn default() -> Self {
        Self {
            period_ms: 3000,
            min_pump_speed_percent: 30,
        }
    }
}

impl RegulationConfig {
    /// Range-check every field.  Construction-time only; nothing in the
    /// control path re-validates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.chimney;
        if !(2..=MAX_HISTORY_CAPACITY).contains(&c.history_size) {
            return Err(ConfigError::ValidationFailed(
                "chimney.history_size must be within 2..=32",
            ));
        }
        if c.min_temperature_pump_threshold_c >= c.max_temperature_pump_threshold_c {
            return Err(ConfigError::ValidationFailed(
                "chimney pump thresholds: min must be below max",
            ));
        }
        if c.considered_fire_threshold_c >= c.max_temperature_c {
            return Err(ConfigError::ValidationFailed(
                "chimney.considered_fire_threshold_c must be below max_temperature_c",
            ));
        }
        if self.valve.opening_duration_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "valve.opening_duration_secs must be non-zero",
            ));
        }
        if self.valve.tick_ms == 0 {
            return Err(ConfigError::ValidationFailed("valve.tick_ms must be non-zero"));
        }
        if !(2..=MAX_FLOW_WINDOW).contains(&self.flow.window_samples) {
            return Err(ConfigError::ValidationFailed(
                "flow.window_samples must be within 2..=32",
            ));
        }
        if self.regulation.min_pump_speed_percent > 100 {
            return Err(ConfigError::ValidationFailed(
                "regulation.min_pump_speed_percent must be <= 100",
            ));
        }
        if self.regulation.period_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "regulation.period_ms must be non-zero",
            ));
        }
        Ok(())
    }
}
