//! Controller → chimney / valve worker, end to end on mock hardware.

use std::time::{Duration as StdDuration, Instant as StdInstant};

use woodloop::accumulator::{Accumulator, Layer};
use woodloop::adapters::sim::SimTemperature;
use woodloop::chimney::{ChimneyState, ChimneyStateMachine};
use woodloop::config::{AccumulatorConfig, ChimneyConfig, RegulationLoopConfig, ValveConfig};
use woodloop::events::RegulationEvent;
use woodloop::pump::Pump;
use woodloop::regulation::{
    PumpDecision, RegulationController, RegulationRunner, ValveDecision,
};
use woodloop::shared::Shared;
use woodloop::valve::{ValveActuator, ValveHandle, ValveOrder, ValveState, ValveWorker};

use crate::mock_hw::{EventLog, HwLog, MockCoil, MockDelay, MockPwm};

struct Plant {
    combustion: SimTemperature,
    acc1_top: SimTemperature,
    acc2_bottom: SimTemperature,
    chimney: Shared<ChimneyStateMachine>,
    valve: ValveHandle,
    _worker: ValveWorker,
    controller: Option<RegulationController<ValveHandle>>,
    hw: HwLog,
    events: EventLog,
}

fn plant() -> Plant {
    let hw = HwLog::new();
    let events = EventLog::new();
    let combustion = SimTemperature::new(20.0);
    let chimney = Shared::new(
        ChimneyStateMachine::new(
            &ChimneyConfig { history_size: 2, ..Default::default() },
            Box::new(MockDelay::new(&hw)),
        )
        .with_combustion_sensor(Box::new(combustion.clone()))
        .with_pipe_sensors(
            Box::new(SimTemperature::new(40.0)),
            Box::new(SimTemperature::new(55.0)),
        )
        .with_pump(Pump::new(Box::new(MockPwm::new(&hw)))),
    );

    let valve_cfg = ValveConfig { opening_duration_secs: 1, init_grace_secs: 0, tick_ms: 25 };
    let valve = ValveActuator::new(
        MockCoil::new("open", &hw),
        MockCoil::new("close", &hw),
        &valve_cfg,
    )
    .unwrap();
    let worker = ValveWorker::spawn(valve, &valve_cfg).unwrap();

    let acc1_top = SimTemperature::new(50.0);
    let acc2_bottom = SimTemperature::new(25.0);
    let acc1 = Shared::new(
        Accumulator::new(&AccumulatorConfig::default())
            .with_probe(Layer::Top, Box::new(acc1_top.clone())),
    );
    let acc2 = Shared::new(
        Accumulator::new(&AccumulatorConfig::default())
            .with_probe(Layer::Bottom, Box::new(acc2_bottom.clone())),
    );

    let mut controller = RegulationController::new(&RegulationLoopConfig::default())
        .with_chimney(chimney.clone())
        .with_valve(worker.handle())
        .with_accumulator1(acc1)
        .with_accumulator2(acc2);
    controller.subscribe(events.sink());

    Plant {
        combustion,
        acc1_top,
        acc2_bottom,
        chimney,
        valve: worker.handle(),
        _worker: worker,
        controller: Some(controller),
        hw,
        events,
    }
}

impl Plant {
    fn sample(&self, t: f64) -> ChimneyState {
        self.combustion.set(t);
        self.chimney.lock(|c| c.on_temperature_sample())
    }

    fn controller(&mut self) -> &mut RegulationController<ValveHandle> {
        self.controller.as_mut().unwrap()
    }

    fn wait_valve_idle(&self) {
        let deadline = StdInstant::now() + StdDuration::from_secs(5);
        while self.valve.is_busy() && StdInstant::now() < deadline {
            std::thread::sleep(StdDuration::from_millis(5));
        }
        assert!(!self.valve.is_busy(), "valve still busy");
    }
}

#[test]
fn first_tick_initialises_the_valve_then_routes() {
    let mut p = plant();
    p.sample(60.0);
    p.sample(70.0);

    let r = p.controller().tick();
    assert_eq!(r.valve, ValveDecision::Issued(ValveOrder::Initialize));
    p.wait_valve_idle();
    assert_eq!(p.valve.state(), ValveState::Initialised);

    // 70 > 50 + 2: hot water goes to accumulator 1
    assert_eq!(p.controller().tick().valve, ValveDecision::Issued(ValveOrder::Close));
    p.wait_valve_idle();
    assert_eq!(p.valve.state(), ValveState::Closed);
    assert_eq!(p.controller().tick().valve, ValveDecision::Hold(ValveOrder::Close));

    p.acc1_top.set(69.0);
    assert_eq!(p.controller().tick().valve, ValveDecision::Issued(ValveOrder::Open));
    p.wait_valve_idle();
    assert_eq!(p.valve.state(), ValveState::Open);
    assert!(p.hw.coils_exclusive("open", "close"));
}

#[test]
fn order_dropped_while_initialising_is_retried() {
    let mut p = plant();
    p.sample(70.0);

    assert_eq!(p.controller().tick().valve, ValveDecision::Issued(ValveOrder::Initialize));
    let deadline = StdInstant::now() + StdDuration::from_secs(1);
    while p.valve.state() != ValveState::Initialising && StdInstant::now() < deadline {
        std::thread::sleep(StdDuration::from_millis(2));
    }
    // valve is Initialising now: the routing order bounces off the busy guard
    let r = p.controller().tick();
    assert!(matches!(
        r.valve,
        ValveDecision::Rejected { order: ValveOrder::Close, .. }
    ));
    assert_eq!(p.controller().last_order(), None);

    p.wait_valve_idle();
    assert_eq!(p.controller().tick().valve, ValveDecision::Issued(ValveOrder::Close));
}

#[test]
fn operator_stop_forces_reinitialisation() {
    let mut p = plant();
    p.sample(70.0);
    p.controller().tick();
    p.wait_valve_idle();
    p.controller().tick();
    p.wait_valve_idle();
    assert_eq!(p.valve.state(), ValveState::Closed);

    p.valve.execute(ValveOrder::Stop).unwrap();
    let deadline = StdInstant::now() + StdDuration::from_secs(1);
    while p.valve.state() != ValveState::Undefined && StdInstant::now() < deadline {
        std::thread::sleep(StdDuration::from_millis(5));
    }
    assert_eq!(p.controller().tick().valve, ValveDecision::Issued(ValveOrder::Initialize));
}

#[test]
fn pump_modulation_tracks_the_chimney() {
    let mut p = plant();

    // heating up: 50 -> 65 with history two, acc2 bottom 25
    p.sample(50.0);
    p.sample(65.0);
    match p.controller().tick().pump {
        PumpDecision::Set(s) => assert!((s - 0.65).abs() < 1e-9),
        other => panic!("unexpected {other:?}"),
    }
    let duty = p.hw_duty();
    assert!((duty - 0.65).abs() < 1e-9);

    // falling: flush at full speed
    p.sample(60.0);
    assert_eq!(p.controller().tick().pump, PumpDecision::Set(1.0));

    // accumulator bottom within 5 °C of the chimney: stop
    p.acc2_bottom.set(56.0);
    assert_eq!(p.controller().tick().pump, PumpDecision::Set(0.0));
    assert_eq!(p.hw_duty(), 0.0);

    // fire out
    p.acc2_bottom.set(25.0);
    p.sample(40.0);
    assert_eq!(p.controller().tick().pump, PumpDecision::Set(0.0));
}

#[test]
fn sensor_loss_leaves_the_pump_to_the_fail_safe() {
    let mut p = plant();
    p.sample(50.0);
    p.combustion.invalidate();
    assert_eq!(p.chimney.lock(|c| c.on_temperature_sample()), ChimneyState::Error);
    assert_eq!(p.hw_duty(), 1.0);
    assert_eq!(p.controller().tick().pump, PumpDecision::Unchanged);
    assert_eq!(p.hw_duty(), 1.0);
}

#[test]
fn runner_emits_ticks_until_stopped() {
    let mut p = plant();
    let controller = p.controller.take().unwrap();
    let cfg = RegulationLoopConfig { period_ms: 20, ..Default::default() };
    let runner = RegulationRunner::spawn(controller, &cfg).unwrap();
    std::thread::sleep(StdDuration::from_millis(150));
    runner.stop();

    let ticks = p
        .events
        .count(|e| matches!(e, RegulationEvent::RegulationTick(_)));
    assert!(ticks >= 3, "only {ticks} ticks");
}

impl Plant {
    fn hw_duty(&self) -> f64 {
        self.hw.last_duty().unwrap_or(0.0)
    }
}
