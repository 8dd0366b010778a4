//! Woodloop: host simulation entry point.
//!
//! Wires every regulation component to simulated hardware and plays a
//! fire curve through it in real time.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                      │
//! │  SimTemperature ×9   GpioOutput<SimPin> ×3   PwmOutput<SimPwm> │
//! │  StdDelay            LogEventSink                             │
//! │                                                               │
//! │  ─────────────────── Port Trait Boundary ──────────────────   │
//! │                                                               │
//! │  ChimneyStateMachine ── Pump ── FlowMeter                     │
//! │  ValveWorker (thread) ── ValveActuator                        │
//! │  RegulationRunner (thread) ── RegulationController            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `woodloop [config.json]`.  `WOODLOOP_SIM_SECS` sets the run
//! length (default 900 s).

use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use embassy_time::Instant;
use log::{info, warn};

use woodloop::accumulator::{Accumulator, Layer};
use woodloop::adapters::hal::{GpioOutput, PwmOutput, StdDelay};
use woodloop::adapters::log_sink::LogEventSink;
use woodloop::adapters::sim::{SimPin, SimPwm, SimTemperature};
use woodloop::chimney::ChimneyStateMachine;
use woodloop::config::RegulationConfig;
use woodloop::flow::FlowMeter;
use woodloop::pump::Pump;
use woodloop::regulation::{RegulationController, RegulationRunner};
use woodloop::shared::Shared;
use woodloop::valve::{ValveActuator, ValveWorker};

const DEFAULT_SIM_SECS: u64 = 900;
/// Pump flow at full speed in the simulated circuit (L/s).
const FULL_SPEED_FLOW_LPS: f64 = 0.9;

// ── Simulated plant ───────────────────────────────────────────

/// Combustion temperature: ten-minute ramp past the full-power threshold,
/// then a slow decay.
fn fire_curve(elapsed_s: u64) -> f64 {
    let minutes = elapsed_s as f64 / 60.0;
    if minutes < 10.0 {
        18.0 + minutes * 7.2
    } else {
        (90.0 - (minutes - 10.0) * 3.0).max(18.0)
    }
}

struct Probes {
    combustion: SimTemperature,
    input: SimTemperature,
    output: SimTemperature,
    acc1_top: SimTemperature,
    acc2_bottom: SimTemperature,
}

impl Probes {
    fn step(&self, elapsed_s: u64, pump_duty: f64) {
        let fire = fire_curve(elapsed_s);
        self.combustion.set(fire);

        let input = self.acc2_bottom.value().unwrap_or(20.0);
        self.input.set(input);
        self.output.set(input + (fire - input).max(0.0) * 0.3);

        // heat carried into the accumulators while the pump runs
        let gain = pump_duty * (fire - input).max(0.0) * 0.002;
        let top = self.acc1_top.value().unwrap_or(20.0) + gain;
        self.acc1_top.set(top.min(85.0));
        self.acc2_bottom.set((input + gain * 0.5).min(80.0));
    }
}

// ── Config ────────────────────────────────────────────────────

fn load_config() -> Result<RegulationConfig> {
    let Some(path) = std::env::args().nth(1) else {
        warn!("No config file given, using defaults");
        return Ok(RegulationConfig::default());
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let config: RegulationConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?;
    info!("Config loaded from {path}");
    Ok(config)
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    info!("╔══════════════════════════════════════╗");
    info!("║  Woodloop v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = load_config()?;
    config.validate()?;

    let sim_secs = std::env::var("WOODLOOP_SIM_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SIM_SECS);

    // ── 1. Simulated hardware ─────────────────────────────────
    let probes = Probes {
        combustion: SimTemperature::new(18.0),
        input: SimTemperature::new(20.0),
        output: SimTemperature::new(20.0),
        acc1_top: SimTemperature::new(35.0),
        acc2_bottom: SimTemperature::new(20.0),
    };
    let pump_pwm = SimPwm::new(255);

    // ── 2. Flow meter and chimney ─────────────────────────────
    let flow = FlowMeter::new(&config.flow);
    flow.subscribe(Box::new(LogEventSink::new()));

    let mut chimney = ChimneyStateMachine::new(&config.chimney, Box::new(StdDelay))
        .with_combustion_sensor(Box::new(probes.combustion.clone()))
        .with_pipe_sensors(Box::new(probes.input.clone()), Box::new(probes.output.clone()))
        .with_sensor_power(Box::new(GpioOutput::new("sensor-power", SimPin::new())))
        .with_pump(Pump::new(Box::new(PwmOutput::new(pump_pwm.clone()))))
        .with_flow_meter(flow.clone());
    chimney.subscribe(Box::new(LogEventSink::new()));
    let chimney = Shared::new(chimney);

    // ── 3. Valve worker ───────────────────────────────────────
    let mut valve = ValveActuator::new(
        GpioOutput::new("valve-open", SimPin::new()),
        GpioOutput::new("valve-close", SimPin::new()),
        &config.valve,
    )?;
    valve.subscribe(Box::new(LogEventSink::new()));
    let valve_worker = ValveWorker::spawn(valve, &config.valve)?;

    // ── 4. Accumulators and controller ────────────────────────
    let acc1 = Shared::new(
        Accumulator::new(&config.accumulator)
            .with_probe(Layer::Top, Box::new(probes.acc1_top.clone()))
            .with_probe(Layer::Middle, Box::new(SimTemperature::new(30.0)))
            .with_probe(Layer::Bottom, Box::new(SimTemperature::new(25.0))),
    );
    let acc2 = Shared::new(
        Accumulator::new(&config.accumulator)
            .with_probe(Layer::Bottom, Box::new(probes.acc2_bottom.clone())),
    );

    let mut controller = RegulationController::new(&config.regulation)
        .with_chimney(chimney.clone())
        .with_valve(valve_worker.handle())
        .with_accumulator1(acc1)
        .with_accumulator2(acc2)
        .with_hot_water_sensor(Box::new(SimTemperature::new(48.0)));
    controller.subscribe(Box::new(LogEventSink::new()));
    let runner = RegulationRunner::spawn(controller, &config.regulation)?;

    // ── 5. Play the fire curve ────────────────────────────────
    info!("Simulating {sim_secs} s");
    let mut litres = 0.0;
    for second in 0..sim_secs {
        probes.step(second, pump_pwm.duty());
        chimney.lock(|c| c.on_temperature_sample());

        if flow.is_enabled() {
            litres += pump_pwm.duty() * FULL_SPEED_FLOW_LPS;
            if litres >= 1.0 {
                flow.on_pulse(Instant::now());
                chimney.lock(|c| c.on_flow_measured());
                litres -= 1.0;
            }
        }

        if second % 30 == 0 {
            let (state, power) = chimney.lock(|c| (c.state(), c.power_string()));
            info!(
                "SIM | t={second}s chimney={state:?} power={power} flow={:.2} m3/h total={}",
                flow.rate_m3ph(2),
                flow.total_with_initial_string()
            );
        }
        std::thread::sleep(StdDuration::from_secs(1));
    }

    runner.stop();
    valve_worker.shutdown();
    info!("Simulation finished");
    Ok(())
}
