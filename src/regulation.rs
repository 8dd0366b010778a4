//! Periodic regulation loop.
//!
//! ```text
//!            ┌──────────── every period (3 s) ─────────────┐
//!            │                                              │
//!  Chimney ──┤ snapshot ──▶ pump modulation ──▶ set_pump_speed
//!  Acc 2   ──┤ bottom                                       │
//!  Acc 1   ──┤ top ───────▶ valve management ──▶ ValvePort::execute
//!  Hot water ┤ reading ───▶ TickReport ──▶ observers        │
//!            └──────────────────────────────────────────────┘
//! ```
//!
//! The controller only reads snapshots and posts commands; the chimney
//! owns the pump fail-safe and the valve worker owns coil timing.

use core::sync::atomic::{AtomicBool, Ordering};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::accumulator::Accumulator;
use crate::chimney::{ChimneySnapshot, ChimneyState, ChimneyStateMachine};
use crate::config::RegulationLoopConfig;
use crate::error::ValveError;
use crate::events::{Observers, RegulationEvent};
use crate::ports::{EventSink, TemperatureSource};
use crate::shared::Shared;
use crate::task;
use crate::valve::{ValveHandle, ValveOrder, ValveState};

/// Dead-band (°C) between chimney and accumulator top for valve routing.
const VALVE_HYSTERESIS_C: f64 = 2.0;
/// Accumulator bottom must be this much (°C) cooler than the chimney.
const PUMP_MARGIN_C: f64 = 5.0;
const RUNNER_STACK_KB: usize = 64;

// ---------------------------------------------------------------------------
// Valve port
// ---------------------------------------------------------------------------

/// What the controller needs from a valve.
pub trait ValvePort {
    fn state(&self) -> ValveState;

    /// Order the valve last took on, as published by the valve.
    fn order(&self) -> Option<ValveOrder>;

    fn is_busy(&self) -> bool;

    fn can_execute(&self) -> bool;

    fn execute(&self, order: ValveOrder) -> Result<(), ValveError>;
}

impl ValvePort for ValveHandle {
    fn state(&self) -> ValveState {
        ValveHandle::state(self)
    }

    fn order(&self) -> Option<ValveOrder> {
        ValveHandle::order(self)
    }

    fn is_busy(&self) -> bool {
        ValveHandle::is_busy(self)
    }

    fn can_execute(&self) -> bool {
        ValveHandle::can_execute(self)
    }

    fn execute(&self, order: ValveOrder) -> Result<(), ValveError> {
        ValveHandle::execute(self, order)
    }
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpDecision {
    /// Speed requested from the chimney (before its fail-safe override).
    Set(f64),
    /// Nothing issued this tick.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValveDecision {
    /// The order was accepted by the valve.
    Issued(ValveOrder),
    /// Same as the last accepted order; nothing sent.
    Hold(ValveOrder),
    /// The valve refused the order; it is retried next tick.
    Rejected { order: ValveOrder, error: ValveError },
    /// Chimney or accumulator reading unavailable.
    Skipped,
    /// No valve wired.
    Absent,
}

/// Outcome of one regulation cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub pump: PumpDecision,
    pub valve: ValveDecision,
    pub hot_water_c: Option<f64>,
}

/// Pump speed for a chimney reading, or `None` to leave the pump alone.
///
/// `tc` is the chimney reading, `ab` the accumulator 2 bottom reading.
pub fn pump_speed_for(snapshot: &ChimneySnapshot, tc: f64, ab: f64, min_speed: f64) -> Option<f64> {
    let min = snapshot.min_pump_threshold_c;
    let max = snapshot.max_pump_threshold_c;
    if tc < min || ab + PUMP_MARGIN_C > tc {
        return Some(0.0);
    }
    match snapshot.state {
        ChimneyState::HeatingDown => Some(1.0),
        ChimneyState::HeatingUp | ChimneyState::Stabilized => {
            Some(min_speed + (tc - min) / (max - min) * (1.0 - min_speed))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct RegulationController<V: ValvePort> {
    chimney: Option<Shared<ChimneyStateMachine>>,
    valve: Option<V>,
    accumulator1: Option<Shared<Accumulator>>,
    accumulator2: Option<Shared<Accumulator>>,
    hot_water: Option<Box<dyn TemperatureSource + Send>>,
    min_pump_speed: f64,
    /// Last order the valve accepted.
    last_order: Option<ValveOrder>,
    observers: Observers,
}

impl<V: ValvePort> RegulationController<V> {
    pub fn new(config: &RegulationLoopConfig) -> Self {
        Self {
            chimney: None,
            valve: None,
            accumulator1: None,
            accumulator2: None,
            hot_water: None,
            min_pump_speed: f64::from(config.min_pump_speed_percent.min(100)) / 100.0,
            last_order: None,
            observers: Observers::new(),
        }
    }

    pub fn with_chimney(mut self, chimney: Shared<ChimneyStateMachine>) -> Self {
        self.chimney = Some(chimney);
        self
    }

    pub fn with_valve(mut self, valve: V) -> Self {
        self.valve = Some(valve);
        self
    }

    /// Accumulator 1 (top probe routes the valve).
    pub fn with_accumulator1(mut self, acc: Shared<Accumulator>) -> Self {
        self.accumulator1 = Some(acc);
        self
    }

    /// Accumulator 2 (bottom probe gates the pump).
    pub fn with_accumulator2(mut self, acc: Shared<Accumulator>) -> Self {
        self.accumulator2 = Some(acc);
        self
    }

    pub fn with_hot_water_sensor(mut self, sensor: Box<dyn TemperatureSource + Send>) -> Self {
        self.hot_water = Some(sensor);
        self
    }

    pub fn subscribe(&mut self, sink: Box<dyn EventSink + Send>) {
        self.observers.subscribe(sink);
    }

    pub fn last_order(&self) -> Option<ValveOrder> {
        self.last_order
    }

    /// Run one regulation cycle.
    pub fn tick(&mut self) -> TickReport {
        let snapshot = self.chimney.as_ref().map(|c| {
            c.lock(|c| {
                c.on_flow_measured();
                c.snapshot()
            })
        });

        let pump = self.modulate_pump(snapshot.as_ref());
        let valve = self.manage_valve(snapshot.as_ref());
        let hot_water_c = self.read_hot_water();

        let report = TickReport {
            pump,
            valve,
            hot_water_c,
        };
        debug!("Regulation: {report:?}");
        self.observers.emit(&RegulationEvent::RegulationTick(report));
        report
    }

    fn modulate_pump(&mut self, snapshot: Option<&ChimneySnapshot>) -> PumpDecision {
        let (Some(chimney), Some(snapshot)) = (&self.chimney, snapshot) else {
            warn!("Regulation: no chimney wired");
            return PumpDecision::Unchanged;
        };
        let Some(tc) = snapshot.temperature else {
            debug!("Regulation: chimney reading invalid, pump left to fail-safe");
            return PumpDecision::Unchanged;
        };
        let ab = self
            .accumulator2
            .as_ref()
            .and_then(|a| a.lock(Accumulator::bottom_temperature))
            .unwrap_or(0.0);

        match pump_speed_for(snapshot, tc, ab, self.min_pump_speed) {
            Some(speed) => {
                info!(
                    "Regulation: pump {:.0}% (chimney {tc:.1}, acc2 bottom {ab:.1}, {:?})",
                    speed * 100.0,
                    snapshot.state
                );
                chimney.lock(|c| c.set_pump_speed(speed));
                PumpDecision::Set(speed)
            }
            None => PumpDecision::Unchanged,
        }
    }

    fn manage_valve(&mut self, snapshot: Option<&ChimneySnapshot>) -> ValveDecision {
        let Some(valve) = &self.valve else {
            return ValveDecision::Absent;
        };

        if valve.state() == ValveState::Undefined {
            // whatever was accepted before no longer holds
            self.last_order = None;
            return match valve.execute(ValveOrder::Initialize) {
                Ok(()) => ValveDecision::Issued(ValveOrder::Initialize),
                Err(error) => ValveDecision::Rejected {
                    order: ValveOrder::Initialize,
                    error,
                },
            };
        }

        let Some(tc) = snapshot.and_then(|s| s.temperature) else {
            return ValveDecision::Skipped;
        };
        let Some(at) = self
            .accumulator1
            .as_ref()
            .and_then(|a| a.lock(Accumulator::top_temperature))
        else {
            return ValveDecision::Skipped;
        };

        let desired = if tc > at + VALVE_HYSTERESIS_C {
            ValveOrder::Close
        } else {
            ValveOrder::Open
        };
        // hold only while the valve runs or has run the accepted order;
        // the worker may still refuse it after the handle accepted it
        if self.last_order == Some(desired)
            && (valve.is_busy() || valve.order() == Some(desired))
        {
            return ValveDecision::Hold(desired);
        }
        if !valve.can_execute() {
            return ValveDecision::Rejected {
                order: desired,
                error: ValveError::NotReady,
            };
        }
        match valve.execute(desired) {
            Ok(()) => {
                info!("Regulation: valve {desired:?} (chimney {tc:.1}, acc1 top {at:.1})");
                self.last_order = Some(desired);
                ValveDecision::Issued(desired)
            }
            Err(error) => {
                debug!("Regulation: valve {desired:?} not accepted: {error}");
                ValveDecision::Rejected {
                    order: desired,
                    error,
                }
            }
        }
    }

    fn read_hot_water(&mut self) -> Option<f64> {
        let sensor = self.hot_water.as_mut()?;
        if sensor.is_faulted() {
            sensor.clear_fault();
            return None;
        }
        sensor.read().filter(|t| t.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Periodic runner
// ---------------------------------------------------------------------------

/// Drives a controller on its own thread, one tick per period.
pub struct RegulationRunner {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RegulationRunner {
    pub fn spawn<V>(mut controller: RegulationController<V>, config: &RegulationLoopConfig) -> io::Result<Self>
    where
        V: ValvePort + Send + 'static,
    {
        let period = Duration::from_millis(u64::from(config.period_ms.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = task::spawn_named("regulation", RUNNER_STACK_KB, move || {
            let mut next = Instant::now();
            while !flag.load(Ordering::Acquire) {
                controller.tick();
                next += period;
                loop {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    let now = Instant::now();
                    if now >= next {
                        break;
                    }
                    std::thread::park_timeout(next - now);
                }
            }
            info!("Regulation: runner stopped");
        })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop after the current tick and join.
    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        thread.thread().unpark();
        if thread.join().is_err() {
            warn!("Regulation: runner thread panicked");
        }
    }
}

impl Drop for RegulationRunner {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
