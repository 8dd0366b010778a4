//! Pulse-type water flow meter.
//!
//! The meter outputs one pulse per litre.  A GPIO driver calls
//! [`FlowMeter::on_pulse`] on every rising edge with a monotonic
//! timestamp; the estimator debounces, counts, and keeps a sliding window
//! of `(timestamp, cumulative count)` pairs from which the average flow
//! rate is derived.
//!
//! ```text
//!  edge ──▶ enabled? ──▶ debounce ──▶ current+1, total+1 ──▶ window ──▶ FlowMeasured
//!           (atomic)     (500 ms)                            (FIFO 10)
//! ```
//!
//! The `enabled` gate is an atomic read on the callback path, so a pulse
//! arriving while the pump is off never takes the estimator lock.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embassy_time::{Duration, Instant};
use heapless::Deque;
use log::debug;

use crate::config::{FlowConfig, MAX_FLOW_WINDOW};
use crate::events::{Observers, RegulationEvent};
use crate::ports::EventSink;
use crate::shared::Shared;

const UNIT: &str = "l";

/// Round `value` to `decimals` places.
pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Estimator (single-threaded core)
// ---------------------------------------------------------------------------

/// Debounced pulse counter with a sliding-window rate estimate.
#[derive(Debug)]
pub struct FlowRateEstimator {
    debounce: Duration,
    capacity: usize,
    window: Deque<(Instant, u32), MAX_FLOW_WINDOW>,
    last_edge: Option<Instant>,
    current: u32,
    total: u32,
    initial: u32,
    observers: Observers,
}

impl FlowRateEstimator {
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            debounce: Duration::from_millis(u64::from(config.debounce_ms)),
            capacity: config.window_samples.clamp(2, MAX_FLOW_WINDOW),
            window: Deque::new(),
            last_edge: None,
            current: 0,
            total: 0,
            initial: config.initial_value,
            observers: Observers::new(),
        }
    }

    /// Count an edge at `now` unless it falls inside the debounce window
    /// of the last accepted edge.  Returns whether it was accepted.
    pub fn record_edge(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_edge {
            if now < last + self.debounce {
                return false;
            }
        }
        self.last_edge = Some(now);
        self.current = self.current.wrapping_add(1);
        self.total = self.total.wrapping_add(1);

        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        let _ = self.window.push_back((now, self.current));

        self.observers.emit(&RegulationEvent::FlowMeasured {
            current: self.current,
            total: self.total,
        });
        true
    }

    /// Average rate over the window in litres per second.
    pub fn rate_lps(&self, decimals: u32) -> f64 {
        if self.window.len() < 2 {
            return 0.0;
        }
        let (Some(&(t0, v0)), Some(&(t1, v1))) = (self.window.front(), self.window.back()) else {
            return 0.0;
        };
        let elapsed_secs = t1.saturating_duration_since(t0).as_micros() as f64 / 1_000_000.0;
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        let pulses = f64::from(v1.wrapping_sub(v0));
        round_to(pulses / elapsed_secs, decimals)
    }

    pub fn current_value(&self) -> u32 {
        self.current
    }

    pub fn total_value(&self) -> u32 {
        self.total
    }

    pub fn initial_value(&self) -> u32 {
        self.initial
    }

    pub fn set_initial_value(&mut self, value: u32) {
        self.initial = value;
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Zero the current counter and forget the window.  Total is kept.
    pub fn reset_current(&mut self) {
        self.current = 0;
        self.window.clear();
        self.observers.emit(&RegulationEvent::FlowMeasured {
            current: 0,
            total: self.total,
        });
    }

    /// Fold the current counter into the running total baseline.
    pub fn reset_total(&mut self) {
        self.total = self.current;
    }

    pub fn subscribe(&mut self, sink: Box<dyn EventSink + Send>) {
        self.observers.subscribe(sink);
    }
}

// ---------------------------------------------------------------------------
// Thread-safe handle
// ---------------------------------------------------------------------------

/// Cloneable flow meter handle shared by the pulse driver, the chimney
/// (which gates it with the pump) and telemetry readers.
#[derive(Clone, Debug)]
pub struct FlowMeter {
    enabled: Arc<AtomicBool>,
    estimator: Shared<FlowRateEstimator>,
}

impl FlowMeter {
    /// A new meter starts disabled; it is enabled when the pump runs.
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(false)),
            estimator: Shared::new(FlowRateEstimator::new(config)),
        }
    }

    /// Rising-edge callback.  Safe to call from any driver thread.
    pub fn on_pulse(&self, now: Instant) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let accepted = self.estimator.lock(|e| e.record_edge(now));
        if !accepted {
            debug!("Flow: edge inside debounce window ignored");
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Average flow in L/s; 0 while disabled.
    pub fn rate_lps(&self, decimals: u32) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        self.estimator.lock(|e| e.rate_lps(decimals))
    }

    /// Average flow in m³/h; 0 while disabled.
    pub fn rate_m3ph(&self, decimals: u32) -> f64 {
        round_to(self.rate_lps(decimals * 3) * 3.6, decimals)
    }

    pub fn current_value(&self) -> u32 {
        self.estimator.lock(|e| e.current_value())
    }

    pub fn total_value(&self) -> u32 {
        self.estimator.lock(|e| e.total_value())
    }

    pub fn reset_current(&self) {
        self.estimator.lock(FlowRateEstimator::reset_current);
    }

    pub fn reset_total(&self) {
        self.estimator.lock(FlowRateEstimator::reset_total);
    }

    pub fn set_initial_value(&self, value: u32) {
        self.estimator.lock(|e| e.set_initial_value(value));
    }

    pub fn subscribe(&self, sink: Box<dyn EventSink + Send>) {
        self.estimator.lock(|e| e.subscribe(sink));
    }

    pub fn value_string(&self) -> String {
        format!("{} {UNIT}", self.current_value())
    }

    pub fn total_string(&self) -> String {
        format!("{} {UNIT}", self.total_value())
    }

    pub fn total_with_initial_string(&self) -> String {
        let (total, initial) = self.estimator.lock(|e| (e.total_value(), e.initial_value()));
        format!("{} {UNIT}", u64::from(total) + u64::from(initial))
    }
}
