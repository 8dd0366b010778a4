//! Circulation pump actuator.
//!
//! Thin wrapper over a PWM output.  The only state it carries is the last
//! committed speed, which the chimney reads back for the power display.
//! Safety policy (forced full speed on overheat or sensor loss) lives in
//! the chimney; this is a dumb actuator.

use crate::error::{Error, Result};
use crate::ports::PwmActuator;

pub struct Pump {
    output: Box<dyn PwmActuator + Send>,
    speed: f64,
}

impl Pump {
    pub fn new(output: Box<dyn PwmActuator + Send>) -> Self {
        Self { output, speed: 0.0 }
    }

    /// Commit `speed` (clamped to `0.0..=1.0`) to the PWM output.
    pub fn execute(&mut self, speed: f64) -> Result<()> {
        if !self.output.is_ready() {
            return Err(Error::ActuatorUnavailable("pump"));
        }
        let speed = if speed.is_nan() { 0.0 } else { speed.clamp(0.0, 1.0) };
        self.output.set_duty_cycle(speed);
        self.output.commit();
        self.speed = speed;
        Ok(())
    }

    /// Last committed speed.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_running(&self) -> bool {
        self.speed > 0.0
    }

    pub fn is_ready(&self) -> bool {
        self.output.is_ready()
    }
}

impl core::fmt::Debug for Pump {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pump").field("speed", &self.speed).finish()
    }
}
