//! Detection persistence
//!
//! The pipeline hands finished verdicts to a [`DetectionStore`]. The
//! contract is write-once records queryable by tenant and time range;
//! duplicate writes on retry are tolerated (no dedup key). The bundled
//! implementation is SQLite.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::flow::FlowKey;
use crate::models::{Detection, FeatureRecord, Verdict, VerdictLabel};

/// Durable sink for classified windows
pub trait DetectionStore: Send + Sync {
    /// Persist one detection. Not idempotent; callers tolerate duplicates.
    fn persist(&self, detection: &Detection) -> Result<()>;

    /// Detections for a tenant within `[start_ms, end_ms]`, newest first.
    fn query(&self, tenant: &str, start_ms: i64, end_ms: i64, limit: u32) -> Result<Vec<Detection>>;
}

/// Thread-safe SQLite-backed detection store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.as_ref().display()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                src TEXT NOT NULL,
                dst TEXT NOT NULL,
                proto TEXT NOT NULL,
                src_port INTEGER NOT NULL,
                dst_port INTEGER NOT NULL,
                pkts INTEGER NOT NULL,
                bytes INTEGER NOT NULL,
                duration REAL NOT NULL,
                pps REAL NOT NULL,
                bps REAL NOT NULL,
                score REAL NOT NULL,
                label TEXT NOT NULL,
                ts_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_detections_tenant_ts ON detections(tenant, ts_ms);
            "#,
        )?;

        Ok(())
    }
}

impl DetectionStore for SqliteStore {
    fn persist(&self, detection: &Detection) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO detections
             (tenant, src, dst, proto, src_port, dst_port,
              pkts, bytes, duration, pps, bps, score, label, ts_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                detection.flow.tenant,
                detection.flow.src,
                detection.flow.dst,
                detection.flow.proto,
                detection.flow.src_port,
                detection.flow.dst_port,
                detection.features.pkts,
                detection.features.bytes,
                detection.features.duration,
                detection.features.pps,
                detection.features.bps,
                detection.verdict.score,
                detection.verdict.label.to_string(),
                detection.ts_ms,
            ],
        )?;

        Ok(())
    }

    fn query(&self, tenant: &str, start_ms: i64, end_ms: i64, limit: u32) -> Result<Vec<Detection>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, tenant, src, dst, proto, src_port, dst_port,
                    pkts, bytes, duration, pps, bps, score, label, ts_ms
             FROM detections
             WHERE tenant = ?1 AND ts_ms BETWEEN ?2 AND ?3
             ORDER BY ts_ms DESC
             LIMIT ?4",
        )?;

        let detections = stmt
            .query_map(params![tenant, start_ms, end_ms, limit], |row| {
                Ok(Detection {
                    id: Some(row.get(0)?),
                    flow: FlowKey {
                        tenant: row.get(1)?,
                        src: row.get(2)?,
                        dst: row.get(3)?,
                        proto: row.get(4)?,
                        src_port: row.get(5)?,
                        dst_port: row.get(6)?,
                    },
                    features: FeatureRecord {
                        pkts: row.get(7)?,
                        bytes: row.get(8)?,
                        duration: row.get(9)?,
                        pps: row.get(10)?,
                        bps: row.get(11)?,
                    },
                    verdict: Verdict {
                        score: row.get(12)?,
                        label: row
                            .get::<_, String>(13)?
                            .parse()
                            .unwrap_or(VerdictLabel::Benign),
                    },
                    ts_ms: row.get(14)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(detections)
    }
}
