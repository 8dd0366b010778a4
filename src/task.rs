//! Named worker threads.
//!
//! Every long-lived thread in the plant (valve worker, regulation runner)
//! goes through [`spawn_named`] so thread names and stack sizes are set in
//! one place and show up in logs and debuggers.

use std::io;
use std::thread::JoinHandle;

use log::info;

/// Spawn a named thread with an explicit stack size.
pub fn spawn_named(
    name: &str,
    stack_kb: usize,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    info!("Spawning '{name}' (stack={stack_kb}KB)");
    std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}
