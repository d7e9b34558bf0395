use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::IngestError;
use crate::logging::{info, obj, v_str, warn, Domain};
use crate::reading::{decode_payload, Reading};
use crate::storage::{new_record_id, ReadingStore, WriteReceipt};

mod client;

pub use client::HttpIngestClient;

#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    /// Written to the local store.
    Stored { reading: Reading, receipt: WriteReceipt },
    /// Handed to a remote gateway which answered with this status.
    Forwarded { status: u16 },
}

/// One payload on its way into the store.
///
/// `id` and `received_at` are fixed when the delivery is created, so handing
/// the same delivery over again (a retry after a timeout whose write did
/// commit) overwrites one record instead of adding a second.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

impl Delivery {
    pub fn new(payload: Value) -> Self {
        Self::with_id(new_record_id(), payload)
    }

    pub fn with_id(id: String, payload: Value) -> Self {
        Self { id, received_at: Utc::now(), payload }
    }
}

/// Boundary the bridge pushes decoded payloads into.
#[async_trait]
pub trait Ingest: Send + Sync {
    async fn ingest(&self, delivery: &Delivery) -> Result<Accepted, IngestError>;
}

/// Validates payloads and writes one reading per accepted payload.
///
/// Failures are returned to the caller untouched; retrying is up to whoever
/// drives the gateway.
pub struct Gateway {
    store: Arc<dyn ReadingStore>,
}

impl Gateway {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Ingest for Gateway {
    async fn ingest(&self, delivery: &Delivery) -> Result<Accepted, IngestError> {
        let sample = match decode_payload(&delivery.payload) {
            Ok(sample) => sample,
            Err(err) => {
                warn(
                    Domain::Ingest,
                    "rejected",
                    obj(&[
                        ("record_id", v_str(&delivery.id)),
                        ("reason", v_str(&err.to_string())),
                        ("payload", err.payload().cloned().unwrap_or(json!([]))),
                    ]),
                );
                return Err(err.into());
            }
        };

        let reading = Reading::observe(sample, delivery.received_at);
        let receipt = self.store.append(&delivery.id, &reading).await?;
        info(
            Domain::Ingest,
            "stored",
            obj(&[
                ("record_id", v_str(&receipt.id)),
                ("reading", serde_json::to_value(reading).unwrap_or_default()),
            ]),
        );
        Ok(Accepted::Stored { reading, receipt })
    }
}
