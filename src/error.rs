//! Unified error types for the regulation core.
//!
//! Expected operating conditions (missing wiring, sensor faults, busy
//! actuators) are absorbed into component state and logged; they never
//! surface as `Err` from the hot path.  The variants below are what the
//! rest of the crate funnels into when a caller does need a typed answer,
//! plus the construction-time contract violations.
//! All variants are `Copy` so they can be passed around without allocation.

use core::fmt;

use crate::valve::ValveOrder;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A temperature reading is unavailable.
    SensorInvalid(&'static str),
    /// An actuator is absent or not ready; the command was not applied.
    ActuatorUnavailable(&'static str),
    /// A sensor fault persisted past the configured reset budget.
    FaultExceeded { attempts: u32 },
    /// A value was clamped to keep an invariant (never rejected).
    InvariantViolation(&'static str),
    /// A valve order could not be accepted.
    Valve(ValveError),
    /// Configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensorInvalid(which) => write!(f, "sensor invalid: {which}"),
            Self::ActuatorUnavailable(which) => write!(f, "actuator unavailable: {which}"),
            Self::FaultExceeded { attempts } => {
                write!(f, "sensor fault persists after {attempts} reset attempts")
            }
            Self::InvariantViolation(what) => write!(f, "invariant clamped: {what}"),
            Self::Valve(e) => write!(f, "valve: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Valve errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveError {
    /// A sequence is already running; the order was dropped.
    Busy { dropped: ValveOrder },
    /// One of the coil outputs is not ready.
    NotReady,
    /// The worker is gone (shut down or panicked).
    WorkerStopped,
    /// The opening duration must be non-zero.
    InvalidDuration,
}

impl fmt::Display for ValveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy { dropped } => write!(f, "busy, {dropped:?} order dropped"),
            Self::NotReady => write!(f, "coil outputs not ready"),
            Self::WorkerStopped => write!(f, "worker stopped"),
            Self::InvalidDuration => write!(f, "opening duration must be non-zero"),
        }
    }
}

impl std::error::Error for ValveError {}

impl From<ValveError> for Error {
    fn from(e: ValveError) -> Self {
        Self::Valve(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
