use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::flag;

const SHUTDOWN_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Register SIGINT/SIGTERM/SIGHUP to raise the returned flag. A second
/// signal after the flag is up exits the process immediately.
pub fn install() -> io::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in SHUTDOWN_SIGNALS {
        // The conditional exit must be registered first so it sees the flag
        // before the same delivery sets it.
        flag::register_conditional_shutdown(signal, 1, Arc::clone(&shutdown))?;
        flag::register(signal, Arc::clone(&shutdown))?;
    }
    Ok(shutdown)
}

pub fn requested(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Acquire)
}
