//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sensorlink::chart::{ChartRenderer, ChartSeries, ChartSpec};
use sensorlink::error::{IngestError, RenderError, StoreError};
use sensorlink::ingest::{Accepted, Delivery, Ingest};
use sensorlink::notify::Notifier;
use sensorlink::reading::{decode_payload, Reading, TimeRange};
use sensorlink::storage::{ReadingStore, SqliteStore, WriteReceipt};
use serde_json::Value;

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory(Duration::from_secs(5)).unwrap())
}

/// Store whose every call fails, counting attempts.
#[derive(Default)]
pub struct FailingStore {
    pub appends: AtomicUsize,
    pub queries: AtomicUsize,
}

#[async_trait]
impl ReadingStore for FailingStore {
    async fn append(&self, _id: &str, _reading: &Reading) -> Result<WriteReceipt, StoreError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("store offline".into()))
    }

    async fn query_ordered(&self, _range: TimeRange) -> Result<Vec<Reading>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("store offline".into()))
    }
}

/// Renderer that keeps what it was asked to draw.
#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Mutex<Vec<ChartSeries>>,
}

impl RecordingRenderer {
    pub fn last(&self) -> Option<ChartSeries> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl ChartRenderer for RecordingRenderer {
    fn render(&self, _spec: &ChartSpec, series: &ChartSeries) -> Result<Vec<u8>, RenderError> {
        self.calls.lock().unwrap().push(series.clone());
        Ok(b"\x89PNG-fake".to_vec())
    }
}

pub struct BrokenRenderer;

impl ChartRenderer for BrokenRenderer {
    fn render(&self, _spec: &ChartSpec, _series: &ChartSeries) -> Result<Vec<u8>, RenderError> {
        Err(RenderError::Renderer("canvas unavailable".into()))
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    pub calls: AtomicUsize,
}

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Ingest double: validates like the gateway, records accepted payloads and
/// the delivery id of every call, and can be told to fail the first
/// `fail_first` calls with a store error.
#[derive(Default)]
pub struct RecordingIngest {
    pub payloads: Mutex<Vec<Value>>,
    pub delivery_ids: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub fail_first: usize,
}

impl RecordingIngest {
    pub fn failing_first(n: usize) -> Self {
        Self { fail_first: n, ..Self::default() }
    }

    pub fn accepted(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn delivery_ids(&self) -> Vec<String> {
        self.delivery_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ingest for RecordingIngest {
    async fn ingest(&self, delivery: &Delivery) -> Result<Accepted, IngestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.delivery_ids.lock().unwrap().push(delivery.id.clone());
        decode_payload(&delivery.payload)?;
        if call < self.fail_first {
            return Err(StoreError::Unavailable("transient".into()).into());
        }
        self.payloads.lock().unwrap().push(delivery.payload.clone());
        Ok(Accepted::Forwarded { status: 200 })
    }
}
