use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// One temperature/humidity observation.
///
/// `observed_at` is stamped by the gateway on arrival; the device does not
/// send a clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn observe(sample: Sample, observed_at: DateTime<Utc>) -> Self {
        Self {
            temperature: sample.data1,
            humidity: sample.data2,
            observed_at,
        }
    }
}

/// Device sample as sent on the wire: `data1` is temperature, `data2` humidity.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Sample {
    pub data1: f64,
    pub data2: f64,
}

/// Decode the first sample of a `[{data1, data2}, ...]` payload.
pub fn decode_payload(payload: &Value) -> Result<Sample, ValidationError> {
    let items = match payload {
        Value::Array(items) => items,
        other => return Err(ValidationError::NotASequence { payload: other.clone() }),
    };
    let first = items.first().ok_or(ValidationError::Empty)?;
    Sample::deserialize(first).map_err(|e| ValidationError::InvalidSample {
        payload: payload.clone(),
        reason: e.to_string(),
    })
}

/// Inclusive time window. Open on either side when a bound is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from: Some(from), to: Some(to) }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |f| at >= f) && self.to.map_or(true, |t| at <= t)
    }
}

/// Readings in ascending `observed_at` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    readings: Vec<Reading>,
}

impl Series {
    /// Stable sort, so readings sharing a timestamp keep store order.
    pub fn from_readings(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|r| r.observed_at);
        Self { readings }
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }
}
