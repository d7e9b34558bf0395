use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection};

use crate::error::StoreError;
use crate::reading::{Reading, TimeRange};

pub const RECORD_ID_LEN: usize = 20;

/// Outcome of a merge-write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub id: String,
    pub observed_at: DateTime<Utc>,
}

/// Append-only, time-ordered collection of readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Merge-write `reading` under `id`. Writing the same id again updates
    /// the existing record instead of adding one.
    async fn append(&self, id: &str, reading: &Reading) -> Result<WriteReceipt, StoreError>;

    /// Readings inside `range`, ascending by `observed_at`.
    async fn query_ordered(&self, range: TimeRange) -> Result<Vec<Reading>, StoreError>;
}

/// Random alphanumeric id, generated client side before the write.
pub fn new_record_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECORD_ID_LEN)
        .map(char::from)
        .collect()
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl SqliteStore {
    pub fn open(path: &str, timeout: Duration) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?, timeout)
    }

    pub fn in_memory(timeout: Duration) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, timeout)
    }

    fn from_connection(conn: Connection, timeout: Duration) -> Result<Self, StoreError> {
        init(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), timeout })
    }

    /// Run a blocking SQLite call off the runtime, bounded by the store timeout.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        });
        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(StoreError::Timeout { op, after: self.timeout }),
            Ok(Err(join)) => Err(StoreError::Task(join.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS readings (
            id TEXT PRIMARY KEY,
            temperature REAL NOT NULL,
            humidity REAL NOT NULL,
            observed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS readings_observed_at ON readings (observed_at);
        COMMIT;",
    )?;
    Ok(())
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn append(&self, id: &str, reading: &Reading) -> Result<WriteReceipt, StoreError> {
        let reading = *reading;
        let id = id.to_string();
        self.with_conn("append", move |conn| {
            conn.execute(
                "INSERT INTO readings (id, temperature, humidity, observed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    temperature = excluded.temperature,
                    humidity = excluded.humidity,
                    observed_at = excluded.observed_at",
                params![
                    id,
                    reading.temperature,
                    reading.humidity,
                    reading.observed_at.timestamp_millis()
                ],
            )?;
            Ok(WriteReceipt { id, observed_at: reading.observed_at })
        })
        .await
    }

    async fn query_ordered(&self, range: TimeRange) -> Result<Vec<Reading>, StoreError> {
        let from = range.from.map_or(i64::MIN, |t| t.timestamp_millis());
        let to = range.to.map_or(i64::MAX, |t| t.timestamp_millis());
        self.with_conn("query_ordered", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT temperature, humidity, observed_at FROM readings
                 WHERE observed_at >= ?1 AND observed_at <= ?2
                 ORDER BY observed_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![from, to], |row| {
                Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (temperature, humidity, ms) = row?;
                let observed_at =
                    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(StoreError::BadTimestamp(ms))?;
                out.push(Reading { temperature, humidity, observed_at });
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(Duration::from_secs(5)).unwrap()
    }

    fn reading(t: f64, at: DateTime<Utc>) -> Reading {
        Reading { temperature: t, humidity: t * 2.0, observed_at: at }
    }

    #[test]
    fn record_ids_are_alphanumeric() {
        let id = new_record_id();
        assert_eq!(id.len(), RECORD_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, new_record_id());
    }

    #[tokio::test]
    async fn append_then_query_ordered() {
        let store = store();
        let t0 = Utc::now();
        store.append(&new_record_id(), &reading(3.0, t0 + ChronoDuration::seconds(2))).await.unwrap();
        store.append(&new_record_id(), &reading(1.0, t0)).await.unwrap();
        store.append(&new_record_id(), &reading(2.0, t0 + ChronoDuration::seconds(1))).await.unwrap();

        let all = store.query_ordered(TimeRange::all()).await.unwrap();
        let temps: Vec<f64> = all.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![1.0, 2.0, 3.0]);
        assert_eq!(all[0].humidity, 2.0);
    }

    #[tokio::test]
    async fn query_respects_range() {
        let store = store();
        let t0 = Utc::now();
        for s in 0..5 {
            store.append(&new_record_id(), &reading(s as f64, t0 + ChronoDuration::seconds(s))).await.unwrap();
        }
        let window = TimeRange::between(t0 + ChronoDuration::seconds(1), t0 + ChronoDuration::seconds(3));
        let got = store.query_ordered(window).await.unwrap();
        let temps: Vec<f64> = got.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn timestamps_round_trip_at_millisecond_precision() {
        let store = store();
        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let receipt = store.append(&new_record_id(), &reading(20.0, at)).await.unwrap();
        assert_eq!(receipt.observed_at, at);
        let got = store.query_ordered(TimeRange::all()).await.unwrap();
        assert_eq!(got[0].observed_at, at);
    }

    /// Hold the connection lock from a plain thread for `hold`; returns once
    /// the lock is taken.
    fn hold_connection(store: &SqliteStore, hold: Duration) -> std::thread::JoinHandle<()> {
        let conn = store.conn.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(hold);
        });
        locked_rx.recv().unwrap();
        holder
    }

    #[tokio::test]
    async fn slow_write_times_out() {
        let store = SqliteStore::in_memory(Duration::from_millis(50)).unwrap();
        let holder = hold_connection(&store, Duration::from_millis(200));

        let err = store.append(&new_record_id(), &reading(20.0, Utc::now())).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { op: "append", .. }));
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn retry_after_timed_out_write_keeps_one_record() {
        use crate::error::IngestError;
        use crate::ingest::{Delivery, Gateway, Ingest};
        use crate::retry::{retry_async, RetryConfig};

        let store = Arc::new(SqliteStore::in_memory(Duration::from_millis(50)).unwrap());
        let gateway = Gateway::new(store.clone());
        let delivery = Delivery::new(serde_json::json!([{"data1": 20, "data2": 40}]));
        let retry = RetryConfig { max_retries: 5, base_delay_ms: 1, max_delay_ms: 5, jitter_factor: 0.0 };

        // The first attempts time out, but their writes still commit once the
        // lock is released.
        let holder = hold_connection(&store, Duration::from_millis(120));
        let outcome = retry_async(&retry, "ingest", IngestError::is_retryable, || gateway.ingest(&delivery)).await;
        holder.join().unwrap();
        assert!(outcome.is_ok());

        let rows = store.query_ordered(TimeRange::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].temperature, 20.0);
    }
}
