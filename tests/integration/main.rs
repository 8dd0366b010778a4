//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one subsystem against
//! mock adapters.  All tests run on the host with no real hardware.

mod chimney_tests;
mod regulation_tests;
mod valve_tests;
