//! In-memory hardware for the host binary and tests.
//!
//! Every type is a cheap `Clone` handle over shared state: one clone is
//! handed to the core as a port, the other stays with the simulation (or
//! test) to drive and inspect it.

use std::sync::{Arc, Mutex, PoisonError};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, ErrorKind as DigitalErrorKind, OutputPin};
use embedded_hal::pwm::{self, ErrorKind as PwmErrorKind, SetDutyCycle};

use crate::ports::TemperatureSource;

fn locked<T, R>(m: &Mutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
    let mut guard = m.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Fault injected into a simulated peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFault;

impl digital::Error for SimFault {
    fn kind(&self) -> DigitalErrorKind {
        DigitalErrorKind::Other
    }
}

impl pwm::Error for SimFault {
    fn kind(&self) -> PwmErrorKind {
        PwmErrorKind::Other
    }
}

// ───── Temperature probe ─────

#[derive(Debug, Default)]
struct ProbeState {
    value: Option<f64>,
    faulted: bool,
    /// Fault survives `clear_fault`; only `repair` removes it.
    stuck: bool,
    clears: u32,
}

/// A temperature probe whose reading is set from outside.
#[derive(Debug, Clone, Default)]
pub struct SimTemperature(Arc<Mutex<ProbeState>>);

impl SimTemperature {
    pub fn new(value: f64) -> Self {
        let p = Self::default();
        p.set(value);
        p
    }

    pub fn set(&self, value: f64) {
        locked(&self.0, |s| s.value = Some(value));
    }

    pub fn invalidate(&self) {
        locked(&self.0, |s| s.value = None);
    }

    /// Latch a fault.  A `stuck` fault is not cleared by `clear_fault`.
    pub fn fault(&self, stuck: bool) {
        locked(&self.0, |s| {
            s.faulted = true;
            s.stuck = stuck;
        });
    }

    pub fn repair(&self) {
        locked(&self.0, |s| {
            s.faulted = false;
            s.stuck = false;
        });
    }

    pub fn clear_count(&self) -> u32 {
        locked(&self.0, |s| s.clears)
    }

    pub fn value(&self) -> Option<f64> {
        locked(&self.0, |s| s.value)
    }
}

impl TemperatureSource for SimTemperature {
    fn read(&mut self) -> Option<f64> {
        locked(&self.0, |s| if s.faulted { None } else { s.value })
    }

    fn is_faulted(&self) -> bool {
        locked(&self.0, |s| s.faulted)
    }

    fn clear_fault(&mut self) {
        locked(&self.0, |s| {
            s.clears += 1;
            if !s.stuck {
                s.faulted = false;
            }
        });
    }
}

// ───── Output pin ─────

#[derive(Debug, Default)]
struct PinState {
    high: bool,
    writes: Vec<bool>,
    failing: bool,
}

/// An `embedded-hal` output pin recording every write.
#[derive(Debug, Clone, Default)]
pub struct SimPin(Arc<Mutex<PinState>>);

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        locked(&self.0, |s| s.high)
    }

    pub fn writes(&self) -> Vec<bool> {
        locked(&self.0, |s| s.writes.clone())
    }

    pub fn set_failing(&self, failing: bool) {
        locked(&self.0, |s| s.failing = failing);
    }

    fn write(&self, high: bool) -> Result<(), SimFault> {
        locked(&self.0, |s| {
            if s.failing {
                return Err(SimFault);
            }
            s.high = high;
            s.writes.push(high);
            Ok(())
        })
    }
}

impl digital::ErrorType for SimPin {
    type Error = SimFault;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

// ───── PWM channel ─────

#[derive(Debug, Default)]
struct PwmState {
    max: u16,
    duty: u16,
}

/// An `embedded-hal` PWM channel with a configurable resolution.
#[derive(Debug, Clone)]
pub struct SimPwm(Arc<Mutex<PwmState>>);

impl SimPwm {
    pub fn new(max_duty: u16) -> Self {
        Self(Arc::new(Mutex::new(PwmState { max: max_duty, duty: 0 })))
    }

    pub fn raw_duty(&self) -> u16 {
        locked(&self.0, |s| s.duty)
    }

    /// Duty as a fraction of full scale.
    pub fn duty(&self) -> f64 {
        locked(&self.0, |s| {
            if s.max == 0 { 0.0 } else { f64::from(s.duty) / f64::from(s.max) }
        })
    }
}

impl pwm::ErrorType for SimPwm {
    type Error = SimFault;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        locked(&self.0, |s| s.max)
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        locked(&self.0, |s| {
            s.duty = duty.min(s.max);
            Ok(())
        })
    }
}

// ───── Delay ─────

/// Returns immediately; records requested delays.
#[derive(Debug, Clone, Default)]
pub struct SimDelay(Arc<Mutex<Vec<u32>>>);

impl SimDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested delays in nanoseconds.
    pub fn requested_ns(&self) -> Vec<u32> {
        locked(&self.0, |d| d.clone())
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        locked(&self.0, |d| d.push(ns));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay_ns(ms.saturating_mul(1_000_000));
    }
}
