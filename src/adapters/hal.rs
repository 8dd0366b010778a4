//! embedded-hal adapters.
//!
//! Bridges any `embedded-hal` 1.0 output pin, PWM channel or delay
//! provider to the regulation port traits.  The core never sees HAL types;
//! board bring-up code constructs these once and hands them over as boxed
//! ports.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use log::warn;

use crate::ports::{BinaryActuator, Level, PwmActuator};

// ───── Digital output ─────

/// A GPIO output driving a valve coil or a sensor supply line.
///
/// A failed write marks the output not ready; the next successful commit
/// restores it.
pub struct GpioOutput<P: OutputPin> {
    pin: P,
    name: &'static str,
    staged: Level,
    ready: bool,
}

impl<P: OutputPin> GpioOutput<P> {
    pub fn new(name: &'static str, pin: P) -> Self {
        Self {
            pin,
            name,
            staged: Level::Low,
            ready: true,
        }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> BinaryActuator for GpioOutput<P> {
    fn set_level(&mut self, level: Level) {
        self.staged = level;
    }

    fn commit(&mut self) {
        let result = match self.staged {
            Level::High => self.pin.set_high(),
            Level::Low => self.pin.set_low(),
        };
        match result {
            Ok(()) => self.ready = true,
            Err(e) => {
                warn!("GPIO {}: write failed: {e:?}", self.name);
                self.ready = false;
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

// ───── PWM output ─────

/// A PWM channel driving the circulation pump.
pub struct PwmOutput<P: SetDutyCycle> {
    channel: P,
    staged: f64,
    ready: bool,
}

impl<P: SetDutyCycle> PwmOutput<P> {
    pub fn new(channel: P) -> Self {
        Self {
            channel,
            staged: 0.0,
            ready: true,
        }
    }
}

impl<P: SetDutyCycle> PwmActuator for PwmOutput<P> {
    fn set_duty_cycle(&mut self, duty: f64) {
        self.staged = duty.clamp(0.0, 1.0);
    }

    fn commit(&mut self) {
        let max = self.channel.max_duty_cycle();
        let raw = (self.staged * f64::from(max)).round() as u16;
        match self.channel.set_duty_cycle(raw.min(max)) {
            Ok(()) => self.ready = true,
            Err(e) => {
                warn!("PWM: duty write failed: {e:?}");
                self.ready = false;
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

// ───── Delay ─────

/// Blocking delay on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }
}
