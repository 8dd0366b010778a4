//! Combustion-source state machine.
//!
//! ```text
//!  sample ──▶ fault-handled read ──▶ history (FIFO H) ──▶ classify ──▶ fail-safe ──▶ power
//!                  │                                         │
//!                  └─ power-cycle sensor supply (≤ N/episode) └─ ChimneyStateChanged
//! ```
//!
//! The machine is fed by `on_temperature_sample`, which the sensor drivers
//! call whenever the combustion, input-pipe or output-pipe probe has a new
//! value.  It keeps a bounded history of accepted combustion readings and
//! classifies the fire from the latest reading against the history mean.
//!
//! ## Fail-safe
//!
//! On `Error` (combustion probe lost) and `AtFullPower` the pump is driven
//! at full speed: dumping heat into the accumulators is always safer than
//! letting the exchanger boil.  `set_pump_speed` applies the same override
//! for `Undefined`.

use embedded_hal::delay::DelayNs;
use heapless::Deque;
use log::{debug, error, info, warn};

use crate::config::{ChimneyConfig, MAX_HISTORY_CAPACITY};
use crate::error::{Error, Result};
use crate::events::{Observers, RegulationEvent};
use crate::flow::{FlowMeter, round_to};
use crate::ports::{BinaryActuator, EventSink, Level, TemperatureSource};
use crate::pump::Pump;

/// Specific heat capacity of water, J/(kg·K).
const SPECIFIC_HEAT_CAPACITY: f64 = 4180.0;
/// Trend dead-band (°C) between `Stabilized` and `HeatingUp`.
const TREND_BAND_C: f64 = 0.5;
/// Flow precision used for the power computation.
const FLOW_DECIMALS: u32 = 2;

type Probe = Option<Box<dyn TemperatureSource + Send>>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChimneyState {
    #[default]
    Off,
    HeatingUp,
    HeatingDown,
    AtFullPower,
    Stabilized,
    Undefined,
    Error,
}

impl ChimneyState {
    /// States in which the pump is forced to full speed.
    pub fn forces_full_speed(self) -> bool {
        matches!(self, Self::AtFullPower | Self::Error | Self::Undefined)
    }
}

/// Classify `sample` (already pushed into `history`).
///
/// Pure: identical inputs give identical outputs.
pub fn classify(
    previous: ChimneyState,
    sample: f64,
    history: &[f64],
    pipes_valid: bool,
    config: &ChimneyConfig,
) -> ChimneyState {
    if sample > config.max_temperature_c {
        return ChimneyState::AtFullPower;
    }
    if sample < config.considered_fire_threshold_c {
        return ChimneyState::Off;
    }
    if history.len() < 2 {
        return previous;
    }
    if !pipes_valid {
        return ChimneyState::Undefined;
    }

    let mean = history.iter().sum::<f64>() / history.len() as f64;
    let delta = sample - mean;
    if delta > TREND_BAND_C {
        ChimneyState::HeatingUp
    } else if delta < 0.0 {
        ChimneyState::HeatingDown
    } else if previous != ChimneyState::HeatingDown {
        ChimneyState::Stabilized
    } else {
        previous
    }
}

/// One consistent view of the chimney for a controller tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChimneySnapshot {
    pub state: ChimneyState,
    /// Last accepted combustion reading; `None` while in `Error`.
    pub temperature: Option<f64>,
    pub input_temperature: Option<f64>,
    pub output_temperature: Option<f64>,
    pub power_w: f64,
    pub min_pump_threshold_c: f64,
    pub max_pump_threshold_c: f64,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub struct ChimneyStateMachine {
    config: ChimneyConfig,
    capacity: usize,
    state: ChimneyState,
    history: Deque<f64, MAX_HISTORY_CAPACITY>,

    combustion: Probe,
    input: Probe,
    output: Probe,
    sensor_power: Option<Box<dyn BinaryActuator + Send>>,
    delay: Box<dyn DelayNs + Send>,
    pump: Option<Pump>,
    flow: Option<FlowMeter>,

    reset_count: u32,
    total_reset_count: u32,
    fault_latched: bool,

    last_temperature: Option<f64>,
    last_input: Option<f64>,
    last_output: Option<f64>,
    current_power: f64,

    observers: Observers,
}

impl ChimneyStateMachine {
    pub fn new(config: &ChimneyConfig, delay: Box<dyn DelayNs + Send>) -> Self {
        Self {
            config: config.clone(),
            capacity: config.history_size.clamp(2, MAX_HISTORY_CAPACITY),
            state: ChimneyState::Off,
            history: Deque::new(),
            combustion: None,
            input: None,
            output: None,
            sensor_power: None,
            delay,
            pump: None,
            flow: None,
            reset_count: 0,
            total_reset_count: 0,
            fault_latched: false,
            last_temperature: None,
            last_input: None,
            last_output: None,
            current_power: 0.0,
            observers: Observers::new(),
        }
    }

    pub fn with_combustion_sensor(mut self, sensor: Box<dyn TemperatureSource + Send>) -> Self {
        self.combustion = Some(sensor);
        self
    }

    pub fn with_pipe_sensors(
        mut self,
        input: Box<dyn TemperatureSource + Send>,
        output: Box<dyn TemperatureSource + Send>,
    ) -> Self {
        self.input = Some(input);
        self.output = Some(output);
        self
    }

    /// Attach the combustion sensor supply line; it is energized at once.
    pub fn with_sensor_power(mut self, mut line: Box<dyn BinaryActuator + Send>) -> Self {
        line.set_level(Level::High);
        line.commit();
        self.sensor_power = Some(line);
        self
    }

    pub fn with_pump(mut self, pump: Pump) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn with_flow_meter(mut self, flow: FlowMeter) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn subscribe(&mut self, sink: Box<dyn EventSink + Send>) {
        self.observers.subscribe(sink);
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn state(&self) -> ChimneyState {
        self.state
    }

    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    pub fn total_reset_count(&self) -> u32 {
        self.total_reset_count
    }

    pub fn is_fault_latched(&self) -> bool {
        self.fault_latched
    }

    /// Power computed at the last sample or flow measurement, in watts.
    pub fn current_power(&self) -> f64 {
        self.current_power
    }

    pub fn pump_speed(&self) -> Option<f64> {
        self.pump.as_ref().map(Pump::speed)
    }

    pub fn snapshot(&self) -> ChimneySnapshot {
        ChimneySnapshot {
            state: self.state,
            temperature: self.last_temperature,
            input_temperature: self.last_input,
            output_temperature: self.last_output,
            power_w: self.current_power,
            min_pump_threshold_c: self.config.min_temperature_pump_threshold_c,
            max_pump_threshold_c: self.config.max_temperature_pump_threshold_c,
        }
    }

    // ── Sample handling ──────────────────────────────────────────

    /// Re-classify on a new sample from any of the three probes.
    pub fn on_temperature_sample(&mut self) -> ChimneyState {
        let previous = self.state;

        self.last_input = read_pipe(&mut self.input);
        self.last_output = read_pipe(&mut self.output);

        let next = match self.try_read_combustion() {
            Ok(t) => {
                self.last_temperature = Some(t);
                if self.history.len() >= self.capacity {
                    self.history.pop_front();
                }
                let _ = self.history.push_back(t);
                let pipes_valid = self.last_input.is_some() && self.last_output.is_some();
                let (front, back) = self.history.as_slices();
                let mut samples: heapless::Vec<f64, MAX_HISTORY_CAPACITY> = heapless::Vec::new();
                let _ = samples.extend_from_slice(front);
                let _ = samples.extend_from_slice(back);
                classify(previous, t, &samples, pipes_valid, &self.config)
            }
            Err(e) => {
                debug!("Chimney: {e}");
                self.last_temperature = None;
                ChimneyState::Error
            }
        };

        self.state = next;
        if next != previous {
            info!("Chimney: {previous:?} -> {next:?}");
            self.observers.emit(&RegulationEvent::ChimneyStateChanged {
                from: previous,
                to: next,
            });
        }

        self.apply_fail_safe();
        self.calculate_power();
        self.state
    }

    fn apply_fail_safe(&mut self) {
        let pump_ready = self.pump.as_ref().is_some_and(Pump::is_ready);
        if !pump_ready {
            if self.state == ChimneyState::Off {
                info!("Chimney: pump not available");
            } else {
                warn!("Chimney: pump not available in {:?}", self.state);
            }
        } else if matches!(self.state, ChimneyState::Error | ChimneyState::AtFullPower) {
            self.drive_pump(1.0);
        }
    }

    // ── Combustion sensor fault handling ─────────────────────────

    /// Read the combustion probe, power-cycling it when it reports a
    /// fault.  Once an episode has used up `max_reset_count` attempts the
    /// probe stays invalid until [`Self::clear_fault_episode`].
    pub fn try_read_combustion(&mut self) -> Result<f64> {
        if self.combustion.is_none() {
            return Err(Error::SensorInvalid("chimney"));
        }
        if self.fault_latched {
            return Err(Error::FaultExceeded { attempts: self.reset_count });
        }

        let faulted = self.combustion.as_ref().is_some_and(|s| s.is_faulted());
        if faulted {
            if self.reset_count >= self.config.max_reset_count {
                self.fault_latched = true;
                let e = Error::FaultExceeded { attempts: self.reset_count };
                error!("Chimney: {e}");
                self.observers.emit(&RegulationEvent::SensorFaultExceeded {
                    attempts: self.reset_count,
                });
                return Err(e);
            }
            self.power_cycle_sensor();
        }

        let reading = self
            .combustion
            .as_mut()
            .and_then(|s| s.read())
            .filter(|t| t.is_finite());
        match reading {
            Some(t) => {
                self.reset_count = 0;
                Ok(t)
            }
            None => Err(Error::SensorInvalid("chimney")),
        }
    }

    fn power_cycle_sensor(&mut self) {
        self.reset_count += 1;
        self.total_reset_count += 1;

        match self.sensor_power.as_mut() {
            Some(line) => {
                line.set_level(Level::Low);
                line.commit();
                self.delay.delay_ms(self.config.sensor_power_cycle_ms);
                line.set_level(Level::High);
                line.commit();
            }
            None => warn!("Chimney: no sensor supply line to power-cycle"),
        }

        if let Some(sensor) = self.combustion.as_mut() {
            if sensor.is_faulted() {
                sensor.clear_fault();
            }
        }

        info!(
            "Chimney: sensor reset, count {} total {}",
            self.reset_count, self.total_reset_count
        );
        self.observers.emit(&RegulationEvent::SensorReset {
            attempt: self.reset_count,
            total: self.total_reset_count,
        });
    }

    /// Re-arm fault recovery after an exhausted episode.
    pub fn clear_fault_episode(&mut self) {
        self.fault_latched = false;
        self.reset_count = 0;
    }

    pub fn reset_total_reset_count(&mut self) {
        self.total_reset_count = 0;
    }

    // ── Pump ─────────────────────────────────────────────────────

    /// Command the pump, subject to the fail-safe override.
    pub fn set_pump_speed(&mut self, speed: f64) {
        if !self.pump.as_ref().is_some_and(Pump::is_ready) {
            warn!("Chimney: {}", Error::ActuatorUnavailable("pump"));
            return;
        }
        let speed = match self.state {
            ChimneyState::AtFullPower => 1.0,
            ChimneyState::Error => {
                error!("Chimney: in Error, pump forced to full speed");
                1.0
            }
            ChimneyState::Undefined => {
                warn!("Chimney: in Undefined, pump forced to full speed");
                1.0
            }
            _ => speed,
        };
        self.drive_pump(speed);
    }

    fn drive_pump(&mut self, speed: f64) {
        let Some(pump) = self.pump.as_mut() else {
            return;
        };
        match pump.execute(speed) {
            Ok(()) => {
                let committed = pump.speed();
                if let Some(flow) = &self.flow {
                    flow.set_enabled(committed > 0.0);
                }
                self.observers
                    .emit(&RegulationEvent::PumpSpeedSet { speed: committed });
            }
            Err(e) => warn!("Chimney: {e}"),
        }
    }

    // ── Power ────────────────────────────────────────────────────

    /// Thermal power transferred to the loop, in watts.
    ///
    /// `0.0` when the flow meter or a pipe probe is not wired, `NaN` when a
    /// wired pipe probe reads invalid.
    pub fn calculate_power(&mut self) -> f64 {
        let power = match (&self.flow, self.input.is_some(), self.output.is_some()) {
            (Some(flow), true, true) => match (self.last_input, self.last_output) {
                (Some(t_in), Some(t_out)) => round_to(
                    flow.rate_lps(FLOW_DECIMALS) * SPECIFIC_HEAT_CAPACITY * (t_out - t_in),
                    1,
                ),
                _ => f64::NAN,
            },
            _ => 0.0,
        };
        self.current_power = power;
        power
    }

    /// Refresh power after the flow meter accepted a pulse.
    ///
    /// Takes the flow lock inside the chimney lock, the same order as
    /// [`Self::calculate_power`]; never call it from a flow observer.
    pub fn on_flow_measured(&mut self) -> f64 {
        self.calculate_power()
    }

    /// Human-readable power, `"-"` when no useful heat is transferred.
    pub fn power_string(&self) -> String {
        let pump_idle = self.pump.as_ref().is_none_or(|p| p.speed() == 0.0);
        let reversed = matches!(
            (self.last_input, self.last_output),
            (Some(t_in), Some(t_out)) if t_in > t_out
        );
        if pump_idle || reversed || self.current_power.is_nan() {
            return "-".into();
        }
        format!("{} W", group_thousands(self.current_power.round() as i64))
    }
}

impl core::fmt::Debug for ChimneyStateMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChimneyStateMachine")
            .field("state", &self.state)
            .field("history", &self.history)
            .field("reset_count", &self.reset_count)
            .field("total_reset_count", &self.total_reset_count)
            .field("power", &self.current_power)
            .finish()
    }
}

/// Read a pipe probe; a faulted probe reads `None` and is cleared.
fn read_pipe(probe: &mut Probe) -> Option<f64> {
    let sensor = probe.as_mut()?;
    if sensor.is_faulted() {
        sensor.clear_fault();
        return None;
    }
    sensor.read().filter(|t| t.is_finite())
}

/// `167200` -> `"167 200"`.
fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}
