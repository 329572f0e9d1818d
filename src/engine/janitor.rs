//! Janitor
//!
//! A flow that goes quiet would otherwise leave its last partial window
//! unclassified forever. The janitor sweeps the window store on a fixed
//! interval, force-closing every flow idle longer than the window
//! duration and running the closed windows through the same classify +
//! persist path a worker uses — outside the work queue. On shutdown it
//! performs one final full drain so every opened window is classified.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{unix_now, Shared};

/// Granularity at which the sleep re-checks the shutdown flag
const WAKE_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) fn run(shared: Arc<Shared>, sweep_interval: Duration, window_seconds: f64) {
    debug!(
        "Janitor started (interval {:?}, idle threshold {}s)",
        sweep_interval, window_seconds
    );

    while !shared.is_shutdown() {
        sleep_interruptible(&shared, sweep_interval);
        if shared.is_shutdown() {
            break;
        }

        let now = unix_now();
        let swept = shared.windows.sweep_idle(now, window_seconds);
        if !swept.is_empty() {
            trace!("Sweeping {} idle flows", swept.len());
        }
        for (key, obs) in swept {
            if !obs.is_empty() {
                shared.flush_window(&key, &obs, now);
            }
        }
    }

    // Final sweep: close everything that is still open
    let now = unix_now();
    for (key, obs) in shared.windows.drain() {
        if !obs.is_empty() {
            shared.flush_window(&key, &obs, now);
        }
    }

    debug!("Janitor stopped");
}

/// Sleep for `total`, waking early if shutdown is signalled.
fn sleep_interruptible(shared: &Shared, total: Duration) {
    let mut remaining = total;
    while remaining > Duration::ZERO && !shared.is_shutdown() {
        let step = remaining.min(WAKE_INTERVAL);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
