//! Sensor engine
//!
//! Multi-threaded ingestion pipeline for VXLAN-mirrored traffic.
//!
//! # Architecture
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Listener   │────▶│  Work Queue  │────▶│   Workers    │
//! │ (UDP 4789)  │     │  (bounded)   │     │ (N threads)  │
//! └─────────────┘     └──────────────┘     └──────┬───────┘
//!                                                 │ append
//!                     ┌──────────────┐     ┌──────▼───────┐
//!                     │   Janitor    │────▶│ Window Store │
//!                     │ (idle sweep) │     └──────┬───────┘
//!                     └──────────────┘            │ closed window
//!                                          ┌──────▼───────┐
//!                                          │  Classifier  │
//!                                          └──────┬───────┘
//!                                          ┌──────▼───────┐
//!                                          │  Detection   │
//!                                          │    Store     │
//!                                          └──────────────┘
//! ```
//!
//! The listener never blocks on downstream pressure: when the queue is
//! full the frame is dropped and counted. Classifier and store calls run
//! on worker (or janitor) threads so a slow model stalls at most one
//! worker.

pub mod janitor;
pub mod listener;
pub mod workers;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::config::Config;
use crate::features;
use crate::flow::{FlowKey, TenantMapper, VniTenantMapper, WindowStore};
use crate::frame;
use crate::models::{Detection, Observation};
use crate::store::DetectionStore;

/// A decapsulated frame queued for processing: (inner Ethernet frame, VNI)
pub(crate) type Frame = (Vec<u8>, u32);

/// Wall clock as fractional seconds since the Unix epoch
pub(crate) fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Pipeline counters, updated with relaxed atomics and readable while the
/// pipeline is running
#[derive(Debug, Default)]
pub struct SensorStats {
    /// Datagrams received on the UDP socket
    pub rx_packets: AtomicU64,
    /// Datagrams that failed VXLAN decapsulation
    pub rx_errors: AtomicU64,
    /// Frames accepted onto the work queue
    pub enqueued: AtomicU64,
    /// Frames dropped because the queue was full
    pub dropped_full_queue: AtomicU64,
    /// Frames taken off the queue and applied to a window
    pub handled_packets: AtomicU64,
    /// Windows closed and handed to the classifier
    pub flushed_windows: AtomicU64,
    /// Classifier failures (item abandoned)
    pub classify_errors: AtomicU64,
    /// Store write failures (item abandoned)
    pub persist_errors: AtomicU64,
}

impl SensorStats {
    pub fn snapshot(&self, queue_depth: usize, active_flows: usize) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_full_queue: self.dropped_full_queue.load(Ordering::Relaxed),
            handled_packets: self.handled_packets.load(Ordering::Relaxed),
            flushed_windows: self.flushed_windows.load(Ordering::Relaxed),
            classify_errors: self.classify_errors.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            queue_depth,
            active_flows,
        }
    }
}

/// Point-in-time view of the pipeline counters (for status reporting)
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub enqueued: u64,
    pub dropped_full_queue: u64,
    pub handled_packets: u64,
    pub flushed_windows: u64,
    pub classify_errors: u64,
    pub persist_errors: u64,
    pub queue_depth: usize,
    pub active_flows: usize,
}

/// State shared by the listener, workers and janitor
pub(crate) struct Shared {
    pub windows: WindowStore,
    pub stats: SensorStats,
    pub classifier: Box<dyn Classifier>,
    pub store: Box<dyn DetectionStore>,
    pub tenants: Box<dyn TenantMapper>,
    shutdown: AtomicBool,
}

impl Shared {
    pub fn new(
        config: &Config,
        classifier: Box<dyn Classifier>,
        store: Box<dyn DetectionStore>,
        tenants: Box<dyn TenantMapper>,
    ) -> Self {
        Self {
            windows: WindowStore::new(
                config.sensor.window_seconds,
                config.sensor.max_pkts_per_window,
            ),
            stats: SensorStats::default(),
            classifier,
            store,
            tenants,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Apply one dequeued frame to its flow window, flushing if the window
    /// closes.
    pub fn process_frame(&self, inner: &[u8], vni: u32) {
        self.process_frame_at(inner, vni, unix_now());
    }

    pub fn process_frame_at(&self, inner: &[u8], vni: u32, now: f64) {
        let tenant = self.tenants.tenant_for(vni);
        let payload = frame::parse_inner(inner);
        let key = FlowKey::derive(&payload, &tenant);

        let obs = Observation::new(now, inner.len() as u32);
        let closed = self.windows.append(&key, obs, now);
        self.stats.handled_packets.fetch_add(1, Ordering::Relaxed);

        if let Some(closed) = closed {
            self.flush_window(&key, &closed, now);
        }
    }

    /// Classify and persist a closed window. Failures are logged with flow
    /// context and counted; they never propagate to the caller's loop.
    pub fn flush_window(&self, key: &FlowKey, obs: &[Observation], now: f64) {
        let Some(record) = features::extract(obs) else {
            return;
        };
        self.stats.flushed_windows.fetch_add(1, Ordering::Relaxed);

        let verdict = match self.classifier.classify(&key.tenant, key, &record) {
            Ok(verdict) => verdict,
            Err(e) => {
                self.stats.classify_errors.fetch_add(1, Ordering::Relaxed);
                warn!(flow = %key, "Classification failed: {:#}", e);
                return;
            }
        };

        if verdict.is_malicious() {
            info!(
                flow = %key,
                score = verdict.score,
                pkts = record.pkts,
                bps = record.bps,
                "Malicious flow detected"
            );
        } else {
            debug!(flow = %key, score = verdict.score, "Window classified");
        }

        let detection = Detection::new(key.clone(), record, verdict, (now * 1000.0) as i64);
        if let Err(e) = self.store.persist(&detection) {
            self.stats.persist_errors.fetch_add(1, Ordering::Relaxed);
            warn!(flow = %key, "Failed to persist detection: {:#}", e);
        }
    }
}

/// Main sensor: owns the window store, work queue and thread lifecycle.
///
/// Constructed once at startup and handed to the runtime; tests build
/// independent instances with in-memory collaborators.
pub struct Sensor {
    config: Config,
    shared: Arc<Shared>,
    queue_tx: Sender<Frame>,
    queue_rx: Receiver<Frame>,
    handles: Vec<std::thread::JoinHandle<()>>,
    running: bool,
}

impl Sensor {
    pub fn new(
        config: Config,
        classifier: Box<dyn Classifier>,
        store: Box<dyn DetectionStore>,
    ) -> Self {
        Self::with_tenant_mapper(config, classifier, store, Box::new(VniTenantMapper))
    }

    pub fn with_tenant_mapper(
        config: Config,
        classifier: Box<dyn Classifier>,
        store: Box<dyn DetectionStore>,
        tenants: Box<dyn TenantMapper>,
    ) -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(config.sensor.queue_max);
        let shared = Arc::new(Shared::new(&config, classifier, store, tenants));
        Self {
            config,
            shared,
            queue_tx,
            queue_rx,
            handles: Vec::new(),
            running: false,
        }
    }

    /// Bind the socket and spawn the listener, worker and janitor threads.
    /// A bind failure is fatal; there is no degraded mode without the
    /// listener.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            anyhow::bail!("Sensor is already running");
        }

        let socket = listener::bind(self.config.sensor.port)?;
        info!(
            port = self.config.sensor.port,
            workers = self.config.sensor.actual_workers(),
            queue_max = self.config.sensor.queue_max,
            window_seconds = self.config.sensor.window_seconds,
            max_pkts_per_window = self.config.sensor.max_pkts_per_window,
            "Starting sensor"
        );

        let listener_shared = self.shared.clone();
        let listener_tx = self.queue_tx.clone();
        self.handles.push(
            std::thread::Builder::new()
                .name("vxmon-listener".to_string())
                .spawn(move || listener::run(socket, listener_tx, listener_shared))?,
        );

        let grace = Duration::from_secs_f64(self.config.sensor.shutdown_grace_secs);
        for idx in 0..self.config.sensor.actual_workers() {
            let worker_shared = self.shared.clone();
            let worker_rx = self.queue_rx.clone();
            self.handles.push(
                std::thread::Builder::new()
                    .name(format!("vxmon-worker-{}", idx))
                    .spawn(move || workers::run(idx, worker_rx, worker_shared, grace))?,
            );
        }

        let janitor_shared = self.shared.clone();
        let sweep_interval = Duration::from_secs_f64(self.config.sensor.sweep_interval_secs);
        let window_seconds = self.config.sensor.window_seconds;
        self.handles.push(
            std::thread::Builder::new()
                .name("vxmon-janitor".to_string())
                .spawn(move || janitor::run(janitor_shared, sweep_interval, window_seconds))?,
        );

        self.running = true;
        Ok(())
    }

    /// Signal shutdown, drain within the grace period and join all threads.
    /// Any windows still open after the janitor's final sweep are flushed
    /// here so every opened window gets classified.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        info!("Stopping sensor...");
        self.shared.signal_shutdown();

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }

        // Workers may have appended frames after the janitor's final sweep
        let now = unix_now();
        for (key, obs) in self.shared.windows.drain() {
            if !obs.is_empty() {
                self.shared.flush_window(&key, &obs, now);
            }
        }

        self.running = false;
        let snapshot = self.stats();
        info!(
            rx_packets = snapshot.rx_packets,
            handled = snapshot.handled_packets,
            flushed = snapshot.flushed_windows,
            dropped = snapshot.dropped_full_queue,
            "Sensor stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared
            .stats
            .snapshot(self.queue_rx.len(), self.shared.windows.active_flows())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::classify::RateClassifier;
    use crate::frame::testutil::tcp_frame;
    use crate::models::{FeatureRecord, Verdict};
    use crate::store::{DetectionStore, SqliteStore};
    use crate::vxlan;

    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
        inner: RateClassifier,
    }

    impl Classifier for CountingClassifier {
        fn classify(
            &self,
            tenant: &str,
            key: &FlowKey,
            features: &FeatureRecord,
        ) -> Result<Verdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.classify(tenant, key, features)
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn classify(&self, _: &str, _: &FlowKey, _: &FeatureRecord) -> Result<Verdict> {
            anyhow::bail!("model unavailable")
        }
    }

    fn test_shared(classifier: Box<dyn Classifier>, store: Box<dyn DetectionStore>) -> Shared {
        let mut config = Config::default();
        config.sensor.window_seconds = 3.0;
        config.sensor.max_pkts_per_window = 256;
        Shared::new(&config, classifier, store, Box::new(VniTenantMapper))
    }

    #[test]
    fn test_window_lifecycle_end_to_end() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = SqliteStore::open_memory().unwrap();
        let shared = test_shared(
            Box::new(CountingClassifier {
                calls: calls.clone(),
                inner: RateClassifier::default(),
            }),
            Box::new(store.clone()),
        );

        let inner = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 5000, 80, b"payload");
        let datagram = vxlan::encapsulate(7, &inner);
        let (frame, vni) = vxlan::decapsulate(&datagram).unwrap();
        assert_eq!(vni, 7);

        // Four frames inside the window, a fifth past the duration
        for ts in [0.0, 0.5, 1.0, 1.5] {
            shared.process_frame_at(frame, vni, ts);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        shared.process_frame_at(frame, vni, 4.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let detections = store.query("TENANT#7", 0, 10_000, 50).unwrap();
        assert_eq!(detections.len(), 1);

        let det = &detections[0];
        assert_eq!(det.flow.src, "10.0.0.1");
        assert_eq!(det.flow.dst, "10.0.0.2");
        assert_eq!(det.flow.proto, "TCP");
        assert_eq!(det.flow.src_port, 5000);
        assert_eq!(det.flow.dst_port, 80);
        // The closed window holds the first four observations, not the fifth
        assert_eq!(det.features.pkts, 4);
        assert_eq!(det.features.bytes, 4 * frame.len() as u64);
        assert!((det.features.duration - 1.5).abs() < 1e-9);
        assert_eq!(det.ts_ms, 4000);

        // The fifth frame opened the next window
        assert_eq!(shared.windows.active_flows(), 1);
        assert_eq!(shared.stats.handled_packets.load(Ordering::Relaxed), 5);
        assert_eq!(shared.stats.flushed_windows.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_classifier_failure_is_isolated() {
        let store = SqliteStore::open_memory().unwrap();
        let shared = test_shared(Box::new(FailingClassifier), Box::new(store.clone()));

        let inner = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 5000, 80, b"x");
        shared.process_frame_at(&inner, 1, 0.0);
        shared.process_frame_at(&inner, 1, 5.0); // triggers flush, classify fails

        assert_eq!(shared.stats.classify_errors.load(Ordering::Relaxed), 1);
        assert!(store.query("TENANT#1", 0, 100_000, 10).unwrap().is_empty());

        // Pipeline keeps accepting frames for the same and other flows
        shared.process_frame_at(&inner, 2, 5.0);
        assert_eq!(shared.stats.handled_packets.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_non_ip_frames_are_keyed_not_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = SqliteStore::open_memory().unwrap();
        let shared = test_shared(
            Box::new(CountingClassifier {
                calls: calls.clone(),
                inner: RateClassifier::default(),
            }),
            Box::new(store.clone()),
        );

        shared.process_frame_at(b"\x01\x02garbage", 9, 0.0);
        shared.process_frame_at(b"\x03\x04garbage", 9, 4.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let detections = store.query("TENANT#9", 0, 100_000, 10).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].flow.src, "NONIP");
        assert_eq!(detections[0].flow.proto, "NONIP");
    }

    #[test]
    fn test_stats_snapshot() {
        let shared = test_shared(
            Box::new(RateClassifier::default()),
            Box::new(SqliteStore::open_memory().unwrap()),
        );
        let inner = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 5000, 80, b"x");
        shared.process_frame_at(&inner, 1, 0.0);

        let snapshot = shared.stats.snapshot(3, shared.windows.active_flows());
        assert_eq!(snapshot.handled_packets, 1);
        assert_eq!(snapshot.queue_depth, 3);
        assert_eq!(snapshot.active_flows, 1);
    }
}
