//! Stratified hot-water accumulator.
//!
//! Three optional probes (top, middle, bottom) and a Min/Max temperature
//! pair.  `min < max` always holds: a write that would cross the other
//! bound is clamped to keep a 1 °C gap, never rejected.

use log::debug;

use crate::config::AccumulatorConfig;
use crate::error::Error;
use crate::ports::TemperatureSource;

type Probe = Option<Box<dyn TemperatureSource + Send>>;

/// Tank layer a probe is mounted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Top,
    Middle,
    Bottom,
}

pub struct Accumulator {
    top: Probe,
    middle: Probe,
    bottom: Probe,
    min_temp: f64,
    max_temp: f64,
}

impl Accumulator {
    pub fn new(config: &AccumulatorConfig) -> Self {
        let mut acc = Self {
            top: None,
            middle: None,
            bottom: None,
            min_temp: config.min_temp_c,
            max_temp: config.max_temp_c,
        };
        // re-apply through the setter so an inverted config is clamped too
        acc.set_max_temp(config.max_temp_c);
        acc
    }

    pub fn with_probe(mut self, layer: Layer, probe: Box<dyn TemperatureSource + Send>) -> Self {
        *self.slot(layer) = Some(probe);
        self
    }

    fn slot(&mut self, layer: Layer) -> &mut Probe {
        match layer {
            Layer::Top => &mut self.top,
            Layer::Middle => &mut self.middle,
            Layer::Bottom => &mut self.bottom,
        }
    }

    /// Latest reading of the probe at `layer`.
    ///
    /// `None` when the probe is not wired or faulted; a faulted probe has
    /// its latch cleared so the driver retries.
    pub fn temperature(&mut self, layer: Layer) -> Option<f64> {
        let probe = self.slot(layer).as_mut()?;
        if probe.is_faulted() {
            probe.clear_fault();
            return None;
        }
        probe.read().filter(|t| t.is_finite())
    }

    pub fn top_temperature(&mut self) -> Option<f64> {
        self.temperature(Layer::Top)
    }

    pub fn middle_temperature(&mut self) -> Option<f64> {
        self.temperature(Layer::Middle)
    }

    pub fn bottom_temperature(&mut self) -> Option<f64> {
        self.temperature(Layer::Bottom)
    }

    pub fn min_temp(&self) -> f64 {
        self.min_temp
    }

    pub fn max_temp(&self) -> f64 {
        self.max_temp
    }

    /// Set the upper bound; `value <= min` stores `min + 1`.
    pub fn set_max_temp(&mut self, value: f64) -> f64 {
        self.max_temp = if value <= self.min_temp {
            debug!("{}", Error::InvariantViolation("accumulator max <= min, clamped to min + 1"));
            self.min_temp + 1.0
        } else {
            value
        };
        self.max_temp
    }

    /// Set the lower bound; `value >= max` stores `max - 1`.
    pub fn set_min_temp(&mut self, value: f64) -> f64 {
        self.min_temp = if value >= self.max_temp {
            debug!("{}", Error::InvariantViolation("accumulator min >= max, clamped to max - 1"));
            self.max_temp - 1.0
        } else {
            value
        };
        self.min_temp
    }
}

impl core::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Accumulator")
            .field("min_temp", &self.min_temp)
            .field("max_temp", &self.max_temp)
            .field("top", &self.top.is_some())
            .field("middle", &self.middle.is_some())
            .field("bottom", &self.bottom.is_some())
            .finish()
    }
}
