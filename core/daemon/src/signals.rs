//! Bridges termination signals to the poll loop's stop handle.

use lockwatch_core::StopHandle;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SIGNAL_POLL_MS: u64 = 200;

/// Registers SIGINT/SIGTERM and spawns a watcher that requests a stop once
/// either arrives.
pub fn bridge_to(stop: StopHandle) -> io::Result<()> {
    let received = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&received))?;
    }

    thread::Builder::new()
        .name("lockwatch-signals".to_string())
        .spawn(move || {
            while !received.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(SIGNAL_POLL_MS));
            }
            tracing::info!("Termination signal received");
            stop.request_stop();
        })?;
    Ok(())
}
