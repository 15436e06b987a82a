use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::Result;

pub const SHUTDOWN_SIGNALS: [i32; 2] = [SIGINT, SIGTERM];

/// Flag set by the first SIGINT or SIGTERM. A second one while the flag is
/// already set terminates the process immediately.
pub fn register_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in SHUTDOWN_SIGNALS {
        // Registered first so it sees the flag before this signal sets it.
        flag::register_conditional_shutdown(signal, 1, shutdown.clone())?;
        flag::register(signal, shutdown.clone())?;
    }
    Ok(shutdown)
}
