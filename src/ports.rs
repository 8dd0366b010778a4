//! Port traits: the boundary between regulation logic and the outside world.
//!
//! ```text
//!   Driver adapter ──▶ Port trait ──▶ Chimney / Valve / Controller
//! ```
//!
//! Sensor drivers, GPIO outputs, PWM outputs and event sinks implement
//! these traits.  The core consumes them through trait objects or
//! generics, so it never touches hardware directly and every component
//! is testable with mock adapters.

use crate::events::RegulationEvent;

// ───────────────────────────────────────────────────────────────
// Temperature source (driven adapter: sensor → domain)
// ───────────────────────────────────────────────────────────────

/// A temperature probe.
///
/// `read` never fails loudly: a sensor fault is reported as `None`.
pub trait TemperatureSource {
    /// Latest reading in °C, or `None` when unavailable.
    fn read(&mut self) -> Option<f64>;

    /// Whether the driver has latched a fault.
    fn is_faulted(&self) -> bool;

    /// Clear the latched fault so the driver retries.
    fn clear_fault(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Actuators (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Logic level of a digital output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(on: bool) -> Self {
        if on { Self::High } else { Self::Low }
    }
}

/// A digital output (valve coil, sensor supply line).
///
/// `set_level` only stages the level; `commit` pushes it to hardware.
pub trait BinaryActuator {
    fn set_level(&mut self, level: Level);

    fn commit(&mut self);

    fn is_ready(&self) -> bool;
}

/// A PWM output driving the circulation pump.
pub trait PwmActuator {
    /// Stage a duty cycle in `0.0..=1.0`.
    fn set_duty_cycle(&mut self, duty: f64);

    fn commit(&mut self);

    fn is_ready(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// Components emit structured [`RegulationEvent`]s through this port.
/// Adapters decide where they go (log, UI, telemetry).
pub trait EventSink {
    fn emit(&mut self, event: &RegulationEvent);
}

impl<T: TemperatureSource + ?Sized> TemperatureSource for Box<T> {
    fn read(&mut self) -> Option<f64> {
        (**self).read()
    }

    fn is_faulted(&self) -> bool {
        (**self).is_faulted()
    }

    fn clear_fault(&mut self) {
        (**self).clear_fault();
    }
}

impl<T: BinaryActuator + ?Sized> BinaryActuator for Box<T> {
    fn set_level(&mut self, level: Level) {
        (**self).set_level(level);
    }

    fn commit(&mut self) {
        (**self).commit();
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}
