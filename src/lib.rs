//! Woodloop regulation library.
//!
//! Control logic for a solid-fuel heating loop: the chimney thermal-state
//! classifier, the timed three-way valve, the pulse flow meter and the
//! periodic controller that ties them together.  Hardware is reached only
//! through the traits in [`ports`]; [`adapters`] holds the embedded-hal
//! bridges and the in-memory simulation used by the host binary and tests.

#![deny(unused_must_use)]

pub mod accumulator;
pub mod adapters;
pub mod chimney;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod ports;
pub mod pump;
pub mod regulation;
pub mod shared;
pub mod task;
pub mod valve;

pub use error::{Error, Result};
