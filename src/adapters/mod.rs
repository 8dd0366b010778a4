//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements                  | Connects to                    |
//! |------------|-----------------------------|--------------------------------|
//! | `hal`      | BinaryActuator, PwmActuator | embedded-hal pins, PWM, delay  |
//! | `log_sink` | EventSink                   | `log` records                  |
//! | `sim`      | TemperatureSource, HAL pins | in-memory plant (host, tests)  |

pub mod hal;
pub mod log_sink;
pub mod sim;
