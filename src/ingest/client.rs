use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use super::{Accepted, Delivery, Ingest};
use crate::error::IngestError;
use crate::retry::is_retryable_network_error;

/// Forwards payloads to a remote `POST /sendData` endpoint.
///
/// The delivery id travels with the body, so a retry after a timed-out
/// request lands on the same record at the receiving gateway.
pub struct HttpIngestClient {
    client: Client,
    endpoint: Url,
}

impl HttpIngestClient {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Ingest for HttpIngestClient {
    async fn ingest(&self, delivery: &Delivery) -> Result<Accepted, IngestError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&envelope(delivery))
            .send()
            .await
            .map_err(|e| {
                let kind = if is_retryable_network_error(&e) { "network" } else { "request" };
                IngestError::Upstream { status: None, message: format!("{} error: {}", kind, e) }
            })?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(Accepted::Forwarded { status });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(IngestError::Upstream { status: Some(status), message: body })
    }
}

fn envelope(delivery: &Delivery) -> Value {
    json!({ "id": delivery.id, "data": delivery.payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_endpoint() {
        assert!(HttpIngestClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn envelope_carries_delivery_id() {
        let delivery = Delivery::with_id("abc123".into(), json!([{"data1": 1, "data2": 2}]));
        assert_eq!(envelope(&delivery), json!({"id": "abc123", "data": [{"data1": 1, "data2": 2}]}));
    }

    #[test]
    fn keeps_endpoint() {
        let client = HttpIngestClient::new("http://localhost:3000/sendData", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint().path(), "/sendData");
    }
}
