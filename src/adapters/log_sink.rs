//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every regulation event as one log
//! line.  A telemetry or UI adapter would implement the same trait.

use log::{info, warn};

use crate::events::RegulationEvent;
use crate::ports::EventSink;

/// Adapter that logs every [`RegulationEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &RegulationEvent) {
        match event {
            RegulationEvent::ChimneyStateChanged { from, to } => {
                info!("STATE | chimney {:?} -> {:?}", from, to);
            }
            RegulationEvent::SensorReset { attempt, total } => {
                info!("SENSOR | chimney probe reset attempt={} total={}", attempt, total);
            }
            RegulationEvent::SensorFaultExceeded { attempts } => {
                warn!("SENSOR | chimney probe still faulted after {} resets", attempts);
            }
            RegulationEvent::PumpSpeedSet { speed } => {
                info!("PUMP | speed={:.0}%", speed * 100.0);
            }
            RegulationEvent::ValveStateChanged {
                state,
                order,
                remaining,
            } => {
                info!(
                    "VALVE | state={:?} order={:?} remaining={}s",
                    state,
                    order,
                    remaining.as_secs()
                );
            }
            RegulationEvent::FlowMeasured { current, total } => {
                info!("FLOW | current={} l total={} l", current, total);
            }
            RegulationEvent::RegulationTick(report) => {
                info!(
                    "TICK | pump={:?} valve={:?} hot_water={}",
                    report.pump,
                    report.valve,
                    report
                        .hot_water_c
                        .map_or_else(|| "-".to_string(), |t| format!("{t:.1}\u{00b0}C")),
                );
            }
        }
    }
}
