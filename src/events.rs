//! Outbound notifications and observer registration.
//!
//! Every stateful component owns an [`Observers`] list.  Collaborators
//! outside the core (log sink, UI, telemetry) register an [`EventSink`]
//! once at wiring time and receive each [`RegulationEvent`] synchronously,
//! on the thread that produced it.
//!
//! Sinks run while the emitting component is locked: a sink must not call
//! back into the component that emitted the event.

use embassy_time::Duration;

use crate::chimney::ChimneyState;
use crate::ports::EventSink;
use crate::regulation::TickReport;
use crate::valve::{ValveOrder, ValveState};

/// Structured events emitted by the regulation core.
#[derive(Debug, Clone, PartialEq)]
pub enum RegulationEvent {
    /// The chimney classifier moved between states.
    ChimneyStateChanged { from: ChimneyState, to: ChimneyState },

    /// The combustion sensor supply was power-cycled.
    SensorReset { attempt: u32, total: u32 },

    /// The combustion sensor stayed faulted after every allowed reset.
    SensorFaultExceeded { attempts: u32 },

    /// A pump speed was committed to the actuator.
    PumpSpeedSet { speed: f64 },

    /// Valve progress; emitted on every sequence tick and on completion.
    ValveStateChanged {
        state: ValveState,
        order: Option<ValveOrder>,
        remaining: Duration,
    },

    /// A flow pulse was accepted (or the counter was reset).
    FlowMeasured { current: u32, total: u32 },

    /// One regulation cycle completed.
    RegulationTick(TickReport),
}

/// Registered observers of one component.
#[derive(Default)]
pub struct Observers {
    sinks: Vec<Box<dyn EventSink + Send>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.  There is no unsubscribe: wiring is fixed for the
    /// process lifetime.
    pub fn subscribe(&mut self, sink: Box<dyn EventSink + Send>) {
        self.sinks.push(sink);
    }

    pub fn emit(&mut self, event: &RegulationEvent) {
        for sink in &mut self.sinks {
            sink.emit(event);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl core::fmt::Debug for Observers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Observers")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
