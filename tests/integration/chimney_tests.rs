//! Chimney → pump → flow meter pipeline against mock hardware.

use embassy_time::Instant;
use woodloop::adapters::sim::SimTemperature;
use woodloop::chimney::{ChimneyState, ChimneyStateMachine};
use woodloop::config::{ChimneyConfig, FlowConfig};
use woodloop::events::RegulationEvent;
use woodloop::flow::FlowMeter;
use woodloop::ports::Level;
use woodloop::pump::Pump;

use crate::mock_hw::{EventLog, HwCall, HwLog, MockCoil, MockDelay, MockPwm};

struct Rig {
    chimney: ChimneyStateMachine,
    combustion: SimTemperature,
    input: SimTemperature,
    output: SimTemperature,
    flow: FlowMeter,
    hw: HwLog,
    events: EventLog,
}

fn rig(config: ChimneyConfig) -> Rig {
    let hw = HwLog::new();
    let events = EventLog::new();
    let combustion = SimTemperature::new(20.0);
    let input = SimTemperature::new(40.0);
    let output = SimTemperature::new(60.0);
    let flow = FlowMeter::new(&FlowConfig::default());
    let mut chimney = ChimneyStateMachine::new(&config, Box::new(MockDelay::new(&hw)))
        .with_combustion_sensor(Box::new(combustion.clone()))
        .with_pipe_sensors(Box::new(input.clone()), Box::new(output.clone()))
        .with_sensor_power(Box::new(MockCoil::new("sensor-power", &hw)))
        .with_pump(Pump::new(Box::new(MockPwm::new(&hw))))
        .with_flow_meter(flow.clone());
    chimney.subscribe(events.sink());
    Rig { chimney, combustion, input, output, flow, hw, events }
}

fn history_two() -> ChimneyConfig {
    ChimneyConfig { history_size: 2, ..Default::default() }
}

// ── Classification scenario ───────────────────────────────────

#[test]
fn fire_cycle_scenario_and_notifications() {
    let mut r = rig(history_two());
    let mut states = Vec::new();
    for t in [20.0, 35.0, 50.0, 70.0, 90.0, 70.0] {
        r.combustion.set(t);
        states.push(r.chimney.on_temperature_sample());
    }
    use ChimneyState::*;
    assert_eq!(states, vec![Off, HeatingUp, HeatingUp, HeatingUp, AtFullPower, HeatingDown]);

    let transitions: Vec<_> = r
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            RegulationEvent::ChimneyStateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![(Off, HeatingUp), (HeatingUp, AtFullPower), (AtFullPower, HeatingDown)]
    );

    // full power dumped heat through the pump
    assert_eq!(r.hw.last_duty(), Some(1.0));
    assert!(r.flow.is_enabled());
}

#[test]
fn pipe_probe_loss_makes_trend_undefined_and_power_unknown() {
    let mut r = rig(history_two());
    r.combustion.set(50.0);
    r.chimney.on_temperature_sample();
    r.input.invalidate();
    r.combustion.set(60.0);
    assert_eq!(r.chimney.on_temperature_sample(), ChimneyState::Undefined);
    assert!(r.chimney.current_power().is_nan());
    assert_eq!(r.chimney.power_string(), "-");

    // Undefined forces the pump to full speed on any request
    r.chimney.set_pump_speed(0.3);
    assert_eq!(r.hw.last_duty(), Some(1.0));
}

// ── Power ─────────────────────────────────────────────────────

#[test]
fn power_follows_flow_and_pipe_delta() {
    let mut r = rig(history_two());
    r.combustion.set(25.0);
    r.chimney.on_temperature_sample();
    r.chimney.set_pump_speed(0.8);
    assert_eq!(r.hw.last_duty(), Some(0.8));

    // 2 L/s: one pulse per 500 ms
    for k in 0..=10u64 {
        r.flow.on_pulse(Instant::from_millis(10_000 + k * 500));
    }
    assert_eq!(r.flow.rate_lps(2), 2.0);
    assert_eq!(r.chimney.calculate_power(), 167_200.0);
    assert_eq!(r.chimney.power_string(), "167 200 W");

    // reversed delta: no useful transfer
    r.input.set(65.0);
    r.chimney.on_temperature_sample();
    assert_eq!(r.chimney.power_string(), "-");
}

#[test]
fn power_is_refreshed_by_flow_between_samples() {
    let mut r = rig(history_two());
    r.combustion.set(25.0);
    r.chimney.on_temperature_sample();
    r.chimney.set_pump_speed(1.0);
    assert_eq!(r.chimney.snapshot().power_w, 0.0);

    for k in 0..5u64 {
        r.flow.on_pulse(Instant::from_millis(k * 500));
        r.chimney.on_flow_measured();
    }
    assert_eq!(r.flow.rate_lps(2), 2.0);
    assert_eq!(r.chimney.snapshot().power_w, 167_200.0);
    assert_eq!(r.chimney.power_string(), "167 200 W");
}

#[test]
fn stopping_the_pump_gates_the_flow_meter() {
    let mut r = rig(history_two());
    r.chimney.on_temperature_sample();
    r.chimney.set_pump_speed(0.5);
    r.flow.on_pulse(Instant::from_millis(0));
    r.chimney.set_pump_speed(0.0);
    r.flow.on_pulse(Instant::from_millis(1_000));
    assert_eq!(r.flow.current_value(), 1);
    assert_eq!(r.flow.rate_lps(2), 0.0);
}

// ── Sensor fault recovery ─────────────────────────────────────

#[test]
fn stuck_probe_is_reset_a_bounded_number_of_times() {
    let mut r = rig(ChimneyConfig { max_reset_count: 4, ..history_two() });
    r.combustion.fault(true);

    for _ in 0..10 {
        assert_eq!(r.chimney.on_temperature_sample(), ChimneyState::Error);
    }
    assert_eq!(r.chimney.total_reset_count(), 4);
    assert_eq!(r.hw.delays(), vec![300; 4]);
    assert_eq!(
        r.events.count(|e| matches!(e, RegulationEvent::SensorReset { .. })),
        4
    );
    assert_eq!(
        r.events
            .count(|e| matches!(e, RegulationEvent::SensorFaultExceeded { attempts: 4 })),
        1
    );

    // supply: energized at wiring, then off/on per attempt
    let levels = r.hw.coil_levels("sensor-power");
    assert_eq!(levels.len(), 1 + 2 * 4);
    assert_eq!(levels.last(), Some(&Level::High));

    // Error keeps the pump at full speed
    assert_eq!(r.hw.last_duty(), Some(1.0));

    // operator repairs the probe and re-arms recovery
    r.combustion.repair();
    r.combustion.set(25.0);
    r.chimney.clear_fault_episode();
    assert_eq!(r.chimney.on_temperature_sample(), ChimneyState::Off);
    assert_eq!(r.chimney.reset_count(), 0);
}

#[test]
fn transient_fault_recovers_in_one_cycle() {
    let mut r = rig(history_two());
    r.combustion.set(50.0);
    r.combustion.fault(false);
    r.chimney.on_temperature_sample();
    assert_eq!(r.chimney.total_reset_count(), 1);
    assert_eq!(r.chimney.reset_count(), 0);
    assert_eq!(r.chimney.snapshot().temperature, Some(50.0));
    assert!(r.hw.calls().contains(&HwCall::Delay { ms: 300 }));
    assert_eq!(r.output.clear_count(), 0);
}
