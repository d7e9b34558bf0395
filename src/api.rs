//! HTTP surface: ingestion endpoint, chart image, landing page.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::chart::RenderPipeline;
use crate::error::{IngestError, RenderError};
use crate::ingest::{Delivery, Ingest};
use crate::logging::{error, info, obj, v_str, warn, Domain};
use crate::reading::TimeRange;

const INDEX_HTML: &str = include_str!("../public/index.html");

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn Ingest>,
    pub charts: Arc<RenderPipeline>,
    pub static_dir: PathBuf,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/sendData", post(send_data))
        .route("/grafico.png", get(chart_png))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve<S>(listener: TcpListener, state: AppState, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info(Domain::Http, "listening", obj(&[("addr", v_str(&addr.to_string()))]));
    axum::serve(listener, routes(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info(Domain::Http, "stopped", obj(&[]));
    Ok(())
}

async fn index(State(state): State<AppState>) -> Html<String> {
    match tokio::fs::read_to_string(state.static_dir.join("index.html")).await {
        Ok(page) => Html(page),
        Err(_) => Html(INDEX_HTML.to_string()),
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

const MAX_DELIVERY_ID_LEN: usize = 64;

/// Split a `{"id"?, "data"}` body into a delivery. A caller-supplied id makes
/// repeated submissions of the same body overwrite one record.
fn delivery_from_body(body: &[u8]) -> Result<Delivery, String> {
    let mut envelope = serde_json::from_slice::<Value>(body).map_err(|e| e.to_string())?;
    let payload = envelope.get_mut("data").map(Value::take).unwrap_or(Value::Null);
    match envelope.get("id") {
        None | Some(Value::Null) => Ok(Delivery::new(payload)),
        Some(Value::String(id))
            if !id.is_empty()
                && id.len() <= MAX_DELIVERY_ID_LEN
                && id.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            Ok(Delivery::with_id(id.clone(), payload))
        }
        Some(other) => Err(format!("invalid delivery id {}", other)),
    }
}

async fn send_data(State(state): State<AppState>, body: Bytes) -> Response {
    let delivery = match delivery_from_body(&body) {
        Ok(delivery) => delivery,
        Err(reason) => {
            warn(Domain::Http, "bad_body", obj(&[("error", v_str(&reason))]));
            return (StatusCode::BAD_REQUEST, "Invalid data").into_response();
        }
    };

    match state.gateway.ingest(&delivery).await {
        Ok(_) => (StatusCode::OK, "Data saved successfully!").into_response(),
        Err(IngestError::Validation(_)) => (StatusCode::BAD_REQUEST, "Invalid data").into_response(),
        Err(err) => {
            error(Domain::Http, "ingest_failed", obj(&[("error", v_str(&err.to_string()))]));
            (StatusCode::INTERNAL_SERVER_ERROR, "Error saving data").into_response()
        }
    }
}

/// Optional window, epoch milliseconds, both inclusive.
#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl ChartQuery {
    fn range(&self) -> Option<TimeRange> {
        let at = |ms: Option<i64>| match ms {
            None => Some(None),
            Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms).map(Some),
        };
        Some(TimeRange { from: at(self.from)?, to: at(self.to)? })
    }
}

async fn chart_png(State(state): State<AppState>, Query(query): Query<ChartQuery>) -> Response {
    let Some(range) = query.range() else {
        return (StatusCode::BAD_REQUEST, "Invalid range").into_response();
    };
    match state.charts.render(range).await {
        Ok(image) => ([(header::CONTENT_TYPE, "image/png")], image).into_response(),
        Err(err) => {
            let source = match &err {
                RenderError::Store(_) => "store",
                RenderError::Renderer(_) => "renderer",
            };
            error(
                Domain::Render,
                "render_failed",
                obj(&[("source", v_str(source)), ("error", v_str(&err.to_string()))]),
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Error generating graph").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_query_is_full_range() {
        assert_eq!(ChartQuery::default().range(), Some(TimeRange::all()));
    }

    #[test]
    fn query_bounds_convert_from_millis() {
        let q = ChartQuery { from: Some(1_700_000_000_000), to: None };
        let range = q.range().unwrap();
        assert_eq!(range.from.unwrap().timestamp_millis(), 1_700_000_000_000);
        assert!(range.to.is_none());
    }

    #[test]
    fn body_id_is_kept_or_generated() {
        let given = delivery_from_body(br#"{"id":"abc123","data":[]}"#).unwrap();
        assert_eq!(given.id, "abc123");
        assert_eq!(given.payload, json!([]));

        let fresh = delivery_from_body(br#"{"data":[]}"#).unwrap();
        assert_eq!(fresh.id.len(), 20);

        assert!(delivery_from_body(br#"{"id":"../x","data":[]}"#).is_err());
        assert!(delivery_from_body(br#"{"id":7,"data":[]}"#).is_err());
        assert!(delivery_from_body(b"{not json").is_err());
    }

    #[test]
    fn out_of_range_millis_rejected() {
        let q = ChartQuery { from: Some(i64::MAX), to: None };
        assert!(q.range().is_none());
    }
}
