//! Three-wire motorized three-way valve.
//!
//! Two coil outputs (open, close) drive the motor; the valve has no
//! position feedback, so position is inferred from how long a coil has
//! been energized against the full traverse time.
//!
//! ```text
//!              Initialize                 Open                  Close
//!  Undefined ─────────────▶ Initialising ─────▶ Initialised ─┬──────▶ Opening ──▶ Open
//!      ▲        (close coil, d + grace)                      └──────▶ Closing ──▶ Closed
//!      │
//!      └──────────── Stop / abort() from any state (coils off, re-init required)
//! ```
//!
//! [`ValveActuator`] is the pure state machine: every call takes the
//! current [`Instant`], so it runs under simulated time in tests.  The
//! [`worker`] module wraps it in an actor that owns it on its own thread.

pub mod worker;

use embassy_time::{Duration, Instant};
use log::{debug, info, warn};

use crate::config::ValveConfig;
use crate::error::ValveError;
use crate::events::{Observers, RegulationEvent};
use crate::ports::{BinaryActuator, EventSink, Level};

pub use worker::{ValveHandle, ValveStatus, ValveWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValveState {
    #[default]
    Undefined,
    Initialising,
    Initialised,
    Opening,
    Open,
    Closing,
    Closed,
}

impl ValveState {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Initialising | Self::Opening | Self::Closing)
    }
}

/// Operator or controller intent, independent of the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveOrder {
    Initialize,
    Open,
    Close,
    Stop,
}

/// A timed coil activation in progress.
#[derive(Debug, Clone, Copy)]
struct Sequence {
    order: ValveOrder,
    started: Instant,
    duration: Duration,
}

impl Sequence {
    fn end_state(&self) -> ValveState {
        match self.order {
            ValveOrder::Open => ValveState::Open,
            ValveOrder::Close => ValveState::Closed,
            _ => ValveState::Initialised,
        }
    }
}

pub struct ValveActuator<P: BinaryActuator> {
    open_coil: P,
    close_coil: P,
    opening_duration: Duration,
    init_grace: Duration,

    state: ValveState,
    order: Option<ValveOrder>,
    initialized: bool,
    active: Option<Sequence>,
    /// Order to run once the transparent initialisation completes.
    pending: Option<ValveOrder>,
    remaining: Duration,

    observers: Observers,
}

impl<P: BinaryActuator> ValveActuator<P> {
    /// Fails with [`ValveError::InvalidDuration`] for a zero traverse time.
    pub fn new(open_coil: P, close_coil: P, config: &ValveConfig) -> Result<Self, ValveError> {
        if config.opening_duration_secs == 0 {
            return Err(ValveError::InvalidDuration);
        }
        Ok(Self {
            open_coil,
            close_coil,
            opening_duration: Duration::from_secs(u64::from(config.opening_duration_secs)),
            init_grace: Duration::from_secs(u64::from(config.init_grace_secs)),
            state: ValveState::Undefined,
            order: None,
            initialized: false,
            active: None,
            pending: None,
            remaining: Duration::from_ticks(0),
            observers: Observers::new(),
        })
    }

    pub fn subscribe(&mut self, sink: Box<dyn EventSink + Send>) {
        self.observers.subscribe(sink);
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn state(&self) -> ValveState {
        self.state
    }

    pub fn order(&self) -> Option<ValveOrder> {
        self.order
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// A sequence is running.
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn can_execute(&self) -> bool {
        self.open_coil.is_ready() && self.close_coil.is_ready()
    }

    pub fn opening_duration(&self) -> Duration {
        self.opening_duration
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Accept `order` at `now`.
    ///
    /// `Stop` is always honoured.  Any other order is rejected while a
    /// sequence runs; it is dropped, never queued.
    pub fn begin(&mut self, order: ValveOrder, now: Instant) -> Result<(), ValveError> {
        if order == ValveOrder::Stop {
            self.abort();
            return Ok(());
        }
        if self.active.is_some() {
            return Err(ValveError::Busy { dropped: order });
        }
        if !self.can_execute() {
            return Err(ValveError::NotReady);
        }

        self.order = Some(order);
        match order {
            ValveOrder::Initialize => self.start(ValveOrder::Initialize, now),
            ValveOrder::Open | ValveOrder::Close => {
                if !self.initialized || self.state == ValveState::Undefined {
                    info!("Valve: not initialised, initialising before {order:?}");
                    self.pending = Some(order);
                    self.start(ValveOrder::Initialize, now);
                } else {
                    self.start_if_needed(order, now);
                }
            }
            ValveOrder::Stop => {}
        }
        Ok(())
    }

    /// Advance a running sequence.  Returns whether one is still running.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(seq) = self.active else {
            return false;
        };

        let elapsed = now.saturating_duration_since(seq.started);
        self.remaining = seq
            .duration
            .checked_sub(elapsed)
            .unwrap_or(Duration::from_ticks(0));

        if elapsed < seq.duration {
            self.notify();
            return true;
        }

        self.set_coils(Level::Low, Level::Low);
        self.active = None;
        self.state = seq.end_state();
        if seq.order == ValveOrder::Initialize {
            self.initialized = true;
        }
        info!("Valve: {:?} complete, now {:?}", seq.order, self.state);
        self.notify();

        if let Some(next) = self.pending.take() {
            self.order = Some(next);
            self.start_if_needed(next, now);
        }
        self.active.is_some()
    }

    /// Zero both coils and forget position.  Idempotent.
    pub fn abort(&mut self) {
        if self.active.is_some() {
            warn!("Valve: sequence aborted in {:?}", self.state);
        }
        self.set_coils(Level::Low, Level::Low);
        self.active = None;
        self.pending = None;
        self.state = ValveState::Undefined;
        self.order = Some(ValveOrder::Stop);
        self.initialized = false;
        self.remaining = Duration::from_ticks(0);
        self.notify();
    }

    // ── Internals ────────────────────────────────────────────────

    fn start_if_needed(&mut self, order: ValveOrder, now: Instant) {
        let already_there = matches!(
            (order, self.state),
            (ValveOrder::Open, ValveState::Open) | (ValveOrder::Close, ValveState::Closed)
        );
        if already_there {
            debug!("Valve: already {:?}", self.state);
            return;
        }
        self.start(order, now);
    }

    fn start(&mut self, order: ValveOrder, now: Instant) {
        let (open, close, state, duration) = match order {
            ValveOrder::Open => (Level::High, Level::Low, ValveState::Opening, self.opening_duration),
            ValveOrder::Close => (Level::Low, Level::High, ValveState::Closing, self.opening_duration),
            // the close stop is the reference position
            _ => (
                Level::Low,
                Level::High,
                ValveState::Initialising,
                self.opening_duration + self.init_grace,
            ),
        };
        self.set_coils(open, close);
        self.state = state;
        self.remaining = duration;
        self.active = Some(Sequence { order, started: now, duration });
        self.notify();
    }

    fn set_coils(&mut self, open: Level, close: Level) {
        // never energize both: release before engaging
        self.open_coil.set_level(Level::Low);
        self.close_coil.set_level(Level::Low);
        self.open_coil.commit();
        self.close_coil.commit();
        if open == Level::High {
            self.open_coil.set_level(open);
            self.open_coil.commit();
        }
        if close == Level::High {
            self.close_coil.set_level(close);
            self.close_coil.commit();
        }
    }

    fn notify(&mut self) {
        self.observers.emit(&RegulationEvent::ValveStateChanged {
            state: self.state,
            order: self.order,
            remaining: self.remaining,
        });
    }
}

impl<P: BinaryActuator> core::fmt::Debug for ValveActuator<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValveActuator")
            .field("state", &self.state)
            .field("order", &self.order)
            .field("initialized", &self.initialized)
            .field("remaining", &self.remaining)
            .finish()
    }
}
