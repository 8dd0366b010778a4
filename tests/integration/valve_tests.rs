//! Valve worker against mock coils, in real time with short durations.

use std::time::{Duration as StdDuration, Instant as StdInstant};

use embassy_time::Duration;
use woodloop::config::ValveConfig;
use woodloop::error::ValveError;
use woodloop::events::RegulationEvent;
use woodloop::ports::Level;
use woodloop::valve::{ValveActuator, ValveHandle, ValveOrder, ValveState, ValveWorker};

use crate::mock_hw::{EventLog, HwLog, MockCoil};

fn config() -> ValveConfig {
    ValveConfig {
        opening_duration_secs: 1,
        init_grace_secs: 0,
        tick_ms: 50,
    }
}

fn spawn() -> (ValveWorker, ValveHandle, HwLog, EventLog) {
    let hw = HwLog::new();
    let events = EventLog::new();
    let mut valve = ValveActuator::new(
        MockCoil::new("open", &hw),
        MockCoil::new("close", &hw),
        &config(),
    )
    .unwrap();
    valve.subscribe(events.sink());
    let worker = ValveWorker::spawn(valve, &config()).unwrap();
    let handle = worker.handle();
    (worker, handle, hw, events)
}

fn wait_until(limit_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = StdInstant::now() + StdDuration::from_millis(limit_ms);
    while StdInstant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(StdDuration::from_millis(5));
    }
    cond()
}

#[test]
fn zero_duration_is_a_construction_error() {
    let hw = HwLog::new();
    let cfg = ValveConfig { opening_duration_secs: 0, ..config() };
    let err = ValveActuator::new(MockCoil::new("open", &hw), MockCoil::new("close", &hw), &cfg)
        .err();
    assert_eq!(err, Some(ValveError::InvalidDuration));
}

#[test]
fn full_cycle_initialise_close_open() {
    let (_worker, valve, hw, events) = spawn();

    valve.execute(ValveOrder::Initialize).unwrap();
    assert!(wait_until(3_000, || valve.state() == ValveState::Initialised && !valve.is_busy()));

    valve.execute(ValveOrder::Close).unwrap();
    assert!(wait_until(3_000, || valve.state() == ValveState::Closed && !valve.is_busy()));

    valve.execute(ValveOrder::Open).unwrap();
    assert!(wait_until(3_000, || valve.state() == ValveState::Open && !valve.is_busy()));
    assert_eq!(valve.remaining(), Duration::from_ticks(0));

    assert!(hw.coils_exclusive("open", "close"));
    assert_eq!(hw.coil_levels("open").last(), Some(&Level::Low));
    assert_eq!(hw.coil_levels("close").last(), Some(&Level::Low));

    // remaining time only goes down while opening
    let opening: Vec<Duration> = events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            RegulationEvent::ValveStateChanged {
                state: ValveState::Opening,
                remaining,
                ..
            } => Some(remaining),
            _ => None,
        })
        .collect();
    assert!(opening.len() >= 2);
    assert!(opening.windows(2).all(|w| w[1] <= w[0]));
}

#[test]
fn busy_valve_drops_orders_without_side_effects() {
    let (_worker, valve, _hw, _events) = spawn();
    valve.execute(ValveOrder::Close).unwrap();
    assert!(wait_until(500, || valve.state() == ValveState::Initialising));

    for order in [ValveOrder::Open, ValveOrder::Initialize, ValveOrder::Close] {
        assert_eq!(valve.execute(order), Err(ValveError::Busy { dropped: order }));
    }
    assert_eq!(valve.order(), Some(ValveOrder::Close));

    assert!(wait_until(4_000, || !valve.is_busy()));
    assert_eq!(valve.state(), ValveState::Closed);
}

#[test]
fn stop_cuts_coils_before_the_next_tick() {
    let (_worker, valve, hw, _events) = spawn();
    valve.execute(ValveOrder::Initialize).unwrap();
    assert!(wait_until(500, || valve.state() == ValveState::Initialising));

    let stopped_at = StdInstant::now();
    valve.execute(ValveOrder::Stop).unwrap();
    assert!(wait_until(500, || valve.state() == ValveState::Undefined));
    // pre-emptive: well under one full sequence, within about a tick
    assert!(stopped_at.elapsed() < StdDuration::from_millis(400));
    assert!(!valve.is_busy());
    assert_eq!(valve.order(), Some(ValveOrder::Stop));
    assert!(!valve.status().initialized);
    assert_eq!(hw.coil_levels("close").last(), Some(&Level::Low));

    // a later order starts over from initialisation
    valve.execute(ValveOrder::Open).unwrap();
    assert!(wait_until(500, || valve.state() == ValveState::Initialising));
}

#[test]
fn not_ready_coil_refuses_orders() {
    let hw = HwLog::new();
    let open = MockCoil::new("open", &hw);
    *open.readiness().lock().unwrap() = false;
    let valve = ValveActuator::new(open, MockCoil::new("close", &hw), &config()).unwrap();
    let worker = ValveWorker::spawn(valve, &config()).unwrap();
    let handle = worker.handle();
    assert!(!handle.can_execute());
    assert_eq!(handle.execute(ValveOrder::Open), Err(ValveError::NotReady));
    assert!(!handle.is_busy());
}
