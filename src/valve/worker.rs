//! Valve actor.
//!
//! ```text
//!  ValveHandle ──execute(order)──▶ busy CAS ──▶ Channel<order, 1> ──┐
//!       │                                                           ▼
//!       └──abort() / Stop──────────▶ Signal<()> ─────────────▶ ValveWorker thread
//!                                                                   │ owns ValveActuator
//!  status()/state()/remaining() ◀──── Shared<ValveStatus> ◀─────────┘ publishes on every step
//! ```
//!
//! The worker owns the [`ValveActuator`] on a dedicated thread and runs at
//! most one sequence at a time.  While a sequence runs it waits on the
//! abort signal with the tick period as timeout: a timeout is a tick, a
//! signal is a pre-emptive stop that lands before the next actuation.
//!
//! The busy flag is claimed by the *caller* with a compare-exchange, so an
//! order posted while another is in flight is rejected synchronously with
//! [`ValveError::Busy`] instead of being queued behind it.

use core::sync::atomic::{AtomicBool, Ordering};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, with_timeout};
use futures_lite::future;
use log::{debug, info, warn};

use super::{ValveActuator, ValveOrder, ValveState};
use crate::config::ValveConfig;
use crate::error::ValveError;
use crate::ports::BinaryActuator;
use crate::shared::Shared;
use crate::task;

/// One order in flight at most.
const ORDER_DEPTH: usize = 1;
const WORKER_STACK_KB: usize = 64;

/// Published view of the valve for callers on other threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValveStatus {
    pub state: ValveState,
    pub order: Option<ValveOrder>,
    pub remaining: Duration,
    pub initialized: bool,
    pub can_execute: bool,
}

impl<P: BinaryActuator> From<&ValveActuator<P>> for ValveStatus {
    fn from(v: &ValveActuator<P>) -> Self {
        Self {
            state: v.state(),
            order: v.order(),
            remaining: v.remaining(),
            initialized: v.is_initialized(),
            can_execute: v.can_execute(),
        }
    }
}

struct Inner {
    orders: Channel<CriticalSectionRawMutex, ValveOrder, ORDER_DEPTH>,
    abort: Signal<CriticalSectionRawMutex, ()>,
    busy: AtomicBool,
    shutdown: AtomicBool,
    stopped: AtomicBool,
    status: Shared<ValveStatus>,
}

impl Inner {
    fn new(status: ValveStatus) -> Self {
        Self {
            orders: Channel::new(),
            abort: Signal::new(),
            busy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            status: Shared::new(status),
        }
    }
}

enum Wake {
    Order(ValveOrder),
    Abort,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable, thread-safe front of a running [`ValveWorker`].
#[derive(Clone)]
pub struct ValveHandle {
    inner: Arc<Inner>,
}

impl ValveHandle {
    /// Post `order` to the worker.
    ///
    /// `Stop` always goes through and pre-empts a running sequence.  Any
    /// other order is dropped with [`ValveError::Busy`] while one is in
    /// flight; callers poll [`Self::state`] and re-issue.
    pub fn execute(&self, order: ValveOrder) -> Result<(), ValveError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(ValveError::WorkerStopped);
        }
        if order == ValveOrder::Stop {
            self.abort();
            return Ok(());
        }
        if !self.can_execute() {
            return Err(ValveError::NotReady);
        }
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Valve: busy, {order:?} dropped");
            return Err(ValveError::Busy { dropped: order });
        }
        // a stop issued before this order is superseded by it
        self.inner.abort.reset();
        if self.inner.orders.try_send(order).is_err() {
            self.inner.busy.store(false, Ordering::Release);
            warn!("Valve: order slot full, {order:?} dropped");
            return Err(ValveError::Busy { dropped: order });
        }
        debug!("Valve: {order:?} posted");
        Ok(())
    }

    /// Stop any sequence and zero the coils.  Idempotent.
    pub fn abort(&self) {
        self.inner.abort.signal(());
    }

    pub fn status(&self) -> ValveStatus {
        self.inner.status.lock(|s| *s)
    }

    pub fn state(&self) -> ValveState {
        self.status().state
    }

    pub fn order(&self) -> Option<ValveOrder> {
        self.status().order
    }

    pub fn remaining(&self) -> Duration {
        self.status().remaining
    }

    /// An order is posted or running.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn can_execute(&self) -> bool {
        self.status().can_execute
    }
}

impl core::fmt::Debug for ValveHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValveHandle")
            .field("status", &self.status())
            .field("busy", &self.is_busy())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Owner of the valve worker thread.  Dropping it stops the worker
/// (coils released) and joins the thread.
pub struct ValveWorker {
    handle: ValveHandle,
    thread: Option<JoinHandle<()>>,
}

impl ValveWorker {
    pub fn spawn<P>(valve: ValveActuator<P>, config: &ValveConfig) -> io::Result<Self>
    where
        P: BinaryActuator + Send + 'static,
    {
        let inner = Arc::new(Inner::new(ValveStatus::from(&valve)));
        let tick = Duration::from_millis(u64::from(config.tick_ms.max(1)));

        let worker_inner = Arc::clone(&inner);
        let thread = task::spawn_named("valve", WORKER_STACK_KB, move || {
            future::block_on(run(valve, &worker_inner, tick));
            worker_inner.stopped.store(true, Ordering::Release);
            info!("Valve: worker stopped");
        })?;

        Ok(Self {
            handle: ValveHandle { inner },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ValveHandle {
        self.handle.clone()
    }

    /// Release the coils and join the worker thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.inner.shutdown.store(true, Ordering::Release);
        self.handle.inner.abort.signal(());
        if thread.join().is_err() {
            warn!("Valve: worker thread panicked");
        }
    }
}

impl Drop for ValveWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

async fn run<P: BinaryActuator>(mut valve: ValveActuator<P>, inner: &Inner, tick: Duration) {
    loop {
        let wake = future::or(
            async { Wake::Order(inner.orders.receive().await) },
            async {
                inner.abort.wait().await;
                Wake::Abort
            },
        )
        .await;

        match wake {
            Wake::Abort => valve.abort(),
            Wake::Order(order) => {
                if let Err(e) = valve.begin(order, Instant::now()) {
                    warn!("Valve: {order:?} rejected: {e}");
                }
                publish(&valve, inner);

                while valve.is_busy() {
                    match with_timeout(tick, inner.abort.wait()).await {
                        Ok(()) => valve.abort(),
                        Err(_) => {
                            valve.tick(Instant::now());
                        }
                    }
                    publish(&valve, inner);
                }
                // only the order arm owns the flag its sender claimed
                inner.busy.store(false, Ordering::Release);
            }
        }

        publish(&valve, inner);

        if inner.shutdown.load(Ordering::Acquire) {
            valve.abort();
            publish(&valve, inner);
            break;
        }
    }
}

fn publish<P: BinaryActuator>(valve: &ValveActuator<P>, inner: &Inner) {
    let status = ValveStatus::from(valve);
    inner.status.lock(|s| *s = status);
}
