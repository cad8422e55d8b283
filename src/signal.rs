//! SIGINT/SIGTERM handling for long-running commands

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Global flag for graceful shutdown on SIGTERM/SIGINT
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install the stop handler (idempotent)
pub fn setup_signal_handler() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // Set up SIGTERM handler
        unsafe {
            let handler = stop_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::signal(libc::SIGTERM, handler);
            libc::signal(libc::SIGINT, handler);
        }
    });
}

/// SIGTERM/SIGINT signal handler
extern "C" fn stop_handler(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::Relaxed);
}

/// The process-wide stop flag raised by the handler
pub fn stop_flag() -> &'static AtomicBool {
    &STOP_REQUESTED
}

/// Resolve once `flag` is raised
pub async fn wait_for_stop(flag: &'static AtomicBool) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    log::info!("Received stop signal");
}
