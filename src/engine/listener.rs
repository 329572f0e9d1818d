//! UDP ingress
//!
//! Receives mirrored datagrams, decapsulates them and pushes frames onto
//! the bounded work queue. The loop never blocks on downstream pressure:
//! a full queue means the frame is dropped and counted. A stalled UDP
//! receiver loses datagrams invisibly in the kernel; an explicit drop
//! counter is observable.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use tracing::{error, info, trace};

use crate::vxlan;

use super::{Frame, SensorStats, Shared};

/// Largest possible UDP payload
const RECV_BUF_LEN: usize = 65_535;

/// How long a single recv waits before re-checking the shutdown flag
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Bind the sensor socket. Failure here is fatal to startup.
pub(crate) fn bind(port: u16) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .with_context(|| format!("Failed to bind UDP port {}", port))?;
    socket
        .set_read_timeout(Some(POLL_TIMEOUT))
        .context("Failed to set socket read timeout")?;
    Ok(socket)
}

/// Receive loop. Runs on a dedicated thread until shutdown; the socket is
/// closed when the loop returns.
pub(crate) fn run(socket: UdpSocket, tx: Sender<Frame>, shared: Arc<Shared>) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    info!("Listening for mirrored traffic on UDP {}", socket.local_addr().map(|a| a.to_string()).unwrap_or_default());

    while !shared.is_shutdown() {
        match socket.recv_from(&mut buf) {
            Ok((len, _addr)) => ingest_datagram(&buf[..len], &tx, &shared.stats),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                if shared.is_shutdown() {
                    break;
                }
                error!("UDP receive error: {}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    info!("Listener stopped");
}

/// Decapsulate one datagram and enqueue the inner frame without blocking.
pub(crate) fn ingest_datagram(data: &[u8], tx: &Sender<Frame>, stats: &SensorStats) {
    use std::sync::atomic::Ordering;

    stats.rx_packets.fetch_add(1, Ordering::Relaxed);

    match vxlan::decapsulate(data) {
        Ok((inner, vni)) => match tx.try_send((inner.to_vec(), vni)) {
            Ok(()) => {
                stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                stats.dropped_full_queue.fetch_add(1, Ordering::Relaxed);
            }
            // Consumers are gone; shutdown is in progress
            Err(TrySendError::Disconnected(_)) => {}
        },
        Err(e) => {
            stats.rx_errors.fetch_add(1, Ordering::Relaxed);
            trace!("Dropping undecapsulatable datagram: {}", e);
        }
    }
}
