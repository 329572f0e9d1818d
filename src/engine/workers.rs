//! Worker pool
//!
//! N threads drain the work queue concurrently. Each dequeued frame is
//! keyed, appended to its flow window, and — when the window closes —
//! carried through feature extraction, classification and persistence on
//! the same thread. A blocking classifier therefore stalls one worker,
//! never the pool or the listener.
//!
//! After shutdown is signalled, workers keep draining whatever is already
//! queued until the queue is empty or the grace deadline passes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::debug;

use super::{Frame, Shared};

/// How long a dequeue waits before re-checking the shutdown flag
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) fn run(idx: usize, rx: Receiver<Frame>, shared: Arc<Shared>, grace: Duration) {
    debug!("Worker {} started", idx);

    loop {
        if shared.is_shutdown() {
            drain(&rx, &shared, grace);
            break;
        }

        match rx.recv_timeout(DEQUEUE_TIMEOUT) {
            Ok((inner, vni)) => shared.process_frame(&inner, vni),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Worker {} stopped", idx);
}

/// Consume already-queued frames until the queue is empty or the deadline
/// passes. New arrivals are not waited for.
fn drain(rx: &Receiver<Frame>, shared: &Shared, grace: Duration) {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok((inner, vni)) => shared.process_frame(&inner, vni),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}
