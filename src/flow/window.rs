//! Per-flow observation windows
//!
//! Accumulates `(timestamp, size)` observations per flow and decides when
//! a window closes: when it has spanned the configured duration, when it
//! reaches the packet cap, or when the owning flow goes idle and the
//! janitor sweeps it.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::models::Observation;

use super::FlowKey;

/// One open window plus idle tracking
struct Window {
    obs: Vec<Observation>,
    last_seen: f64,
}

/// Thread-safe store of open flow windows.
///
/// One coarse lock guards the whole map; append, sweep and drain are
/// mutually exclusive. A duration- or count-triggered flush clears the
/// window but keeps the key, so a persistently active flow re-accumulates
/// under its existing entry. Keys are removed only by
/// [`WindowStore::sweep_idle`] (and the shutdown [`WindowStore::drain`]),
/// which bounds the store to recently active flows rather than cumulative
/// flow history.
pub struct WindowStore {
    window_seconds: f64,
    max_pkts: usize,
    flows: Mutex<HashMap<FlowKey, Window>>,
}

impl WindowStore {
    pub fn new(window_seconds: f64, max_pkts: usize) -> Self {
        Self {
            window_seconds,
            max_pkts,
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Append one observation to the flow's window.
    ///
    /// Returns the closed window when a flush triggers. A window that has
    /// already spanned the configured duration closes *before* the new
    /// observation is added; the arrival opens the next window. The packet
    /// cap closes the window including the observation that filled it.
    pub fn append(&self, key: &FlowKey, obs: Observation, now: f64) -> Option<Vec<Observation>> {
        let mut flows = self.flows.lock();
        let win = flows.entry(key.clone()).or_insert_with(|| Window {
            obs: Vec::new(),
            last_seen: now,
        });
        win.last_seen = now;

        match win.obs.first() {
            Some(first) if now - first.ts >= self.window_seconds => {
                let closed = std::mem::take(&mut win.obs);
                win.obs.push(obs);
                Some(closed)
            }
            _ => {
                win.obs.push(obs);
                if win.obs.len() >= self.max_pkts {
                    Some(std::mem::take(&mut win.obs))
                } else {
                    None
                }
            }
        }
    }

    /// Remove every flow whose last observation is older than
    /// `idle_threshold` and return its window (possibly empty if the flow
    /// was flushed and never re-accumulated). This is the only operation
    /// that deletes keys.
    pub fn sweep_idle(&self, now: f64, idle_threshold: f64) -> Vec<(FlowKey, Vec<Observation>)> {
        let mut flows = self.flows.lock();
        let stale: Vec<FlowKey> = flows
            .iter()
            .filter(|(_, win)| now - win.last_seen > idle_threshold)
            .map(|(key, _)| key.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| flows.remove(&key).map(|win| (key, win.obs)))
            .collect()
    }

    /// Remove and return every tracked window (shutdown flush).
    pub fn drain(&self) -> Vec<(FlowKey, Vec<Observation>)> {
        self.flows
            .lock()
            .drain()
            .map(|(key, win)| (key, win.obs))
            .collect()
    }

    /// Number of flows currently tracked
    pub fn active_flows(&self) -> usize {
        self.flows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tenant: &str, src_port: u16) -> FlowKey {
        FlowKey {
            tenant: tenant.to_string(),
            src: "10.0.0.1".to_string(),
            dst: "10.0.0.2".to_string(),
            proto: "TCP".to_string(),
            src_port,
            dst_port: 80,
        }
    }

    #[test]
    fn test_flush_by_count() {
        let store = WindowStore::new(3.0, 4);
        let k = key("TENANT#1", 5000);

        assert!(store.append(&k, Observation::new(0.0, 100), 0.0).is_none());
        assert!(store.append(&k, Observation::new(0.1, 100), 0.1).is_none());
        assert!(store.append(&k, Observation::new(0.2, 100), 0.2).is_none());

        let closed = store.append(&k, Observation::new(0.3, 100), 0.3).unwrap();
        assert_eq!(closed.len(), 4);

        // Key survives a count flush with an empty window
        assert_eq!(store.active_flows(), 1);
        assert!(store.append(&k, Observation::new(0.4, 100), 0.4).is_none());
    }

    #[test]
    fn test_flush_by_time_excludes_new_observation() {
        let store = WindowStore::new(3.0, 256);
        let k = key("TENANT#1", 5000);

        assert!(store.append(&k, Observation::new(0.0, 64), 0.0).is_none());

        let closed = store.append(&k, Observation::new(3.0, 64), 3.0).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].ts, 0.0);

        // The late arrival opened the next window
        let swept = store.sweep_idle(10.0, 3.0);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].1.len(), 1);
        assert_eq!(swept[0].1[0].ts, 3.0);
    }

    #[test]
    fn test_idle_sweep_removes_key() {
        let store = WindowStore::new(3.0, 256);
        let k = key("TENANT#1", 5000);

        store.append(&k, Observation::new(100.0, 42), 100.0);
        assert_eq!(store.active_flows(), 1);

        let swept = store.sweep_idle(104.0, 3.0);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, k);
        assert_eq!(swept[0].1.len(), 1);
        assert_eq!(swept[0].1[0].size, 42);
        assert_eq!(store.active_flows(), 0);
    }

    #[test]
    fn test_sweep_skips_active_flows() {
        let store = WindowStore::new(3.0, 256);
        let active = key("TENANT#1", 5000);
        let idle = key("TENANT#1", 5001);

        store.append(&idle, Observation::new(0.0, 10), 0.0);
        store.append(&active, Observation::new(3.5, 10), 3.5);

        let swept = store.sweep_idle(4.0, 3.0);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, idle);
        assert_eq!(store.active_flows(), 1);
    }

    #[test]
    fn test_no_cross_flow_leakage() {
        let store = WindowStore::new(3.0, 3);
        let a = key("TENANT#1", 5000);
        let b = key("TENANT#2", 6000);

        // Interleave appends; per-flow sizes disambiguate the windows
        store.append(&a, Observation::new(0.0, 1), 0.0);
        store.append(&b, Observation::new(0.0, 2), 0.0);
        store.append(&a, Observation::new(0.1, 1), 0.1);
        store.append(&b, Observation::new(0.1, 2), 0.1);
        let closed_a = store.append(&a, Observation::new(0.2, 1), 0.2).unwrap();
        let closed_b = store.append(&b, Observation::new(0.2, 2), 0.2).unwrap();

        assert!(closed_a.iter().all(|o| o.size == 1));
        assert!(closed_b.iter().all(|o| o.size == 2));
        assert_eq!(closed_a.len(), 3);
        assert_eq!(closed_b.len(), 3);
    }

    #[test]
    fn test_drain_returns_everything() {
        let store = WindowStore::new(3.0, 256);
        store.append(&key("TENANT#1", 1), Observation::new(0.0, 1), 0.0);
        store.append(&key("TENANT#1", 2), Observation::new(0.0, 1), 0.0);

        let drained = store.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(store.active_flows(), 0);
    }

    #[test]
    fn test_swept_window_may_be_empty_after_count_flush() {
        let store = WindowStore::new(3.0, 2);
        let k = key("TENANT#1", 5000);

        store.append(&k, Observation::new(0.0, 1), 0.0);
        let closed = store.append(&k, Observation::new(0.1, 1), 0.1);
        assert!(closed.is_some());

        // Flow went silent after the flush; the sweep returns an empty window
        let swept = store.sweep_idle(10.0, 3.0);
        assert_eq!(swept.len(), 1);
        assert!(swept[0].1.is_empty());
    }
}
