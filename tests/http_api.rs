mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{memory_store, FailingStore, RecordingRenderer};
use sensorlink::api::{routes, AppState};
use sensorlink::chart::{ChartSpec, RenderPipeline};
use sensorlink::ingest::Gateway;
use sensorlink::storage::ReadingStore;
use tower::ServiceExt;

fn app(store: Arc<dyn ReadingStore>, renderer: Arc<RecordingRenderer>) -> Router {
    routes(AppState {
        gateway: Arc::new(Gateway::new(store.clone())),
        charts: Arc::new(RenderPipeline::new(store, renderer, ChartSpec::default())),
        static_dir: PathBuf::from("/nonexistent/static"),
    })
}

fn post_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/sendData")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn posted_reading_shows_up_in_the_chart() {
    let renderer = Arc::new(RecordingRenderer::default());
    let app = app(memory_store(), renderer.clone());

    let response = app
        .clone()
        .oneshot(post_json(r#"{"data":[{"data1":20,"data2":40}]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Data saved successfully!");

    let response = app.oneshot(get("/grafico.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let drawn = renderer.last().unwrap();
    assert_eq!(drawn.temperature.last(), Some(&20.0));
    assert_eq!(drawn.humidity.last(), Some(&40.0));
}

#[tokio::test]
async fn malformed_submissions_are_rejected() {
    let store = memory_store();
    let app = app(store.clone(), Arc::new(RecordingRenderer::default()));

    for body in [r#"{"data":[]}"#, r#"{"temperature":20}"#, r#"{"data":"oops"}"#, "{not json"] {
        let response = app.clone().oneshot(post_json(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(body_text(response).await, "Invalid data");
    }

    let rows = store.query_ordered(Default::default()).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn resubmitted_delivery_id_updates_one_record() {
    let store = memory_store();
    let app = app(store.clone(), Arc::new(RecordingRenderer::default()));

    for temperature in [20, 21] {
        let body = format!(r#"{{"id":"bridge0001","data":[{{"data1":{},"data2":40}}]}}"#, temperature);
        let response = app.clone().oneshot(post_json(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let rows = store.query_ordered(Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].temperature, 21.0);

    let response = app
        .oneshot(post_json(r#"{"id":"../x","data":[{"data1":20,"data2":40}]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_outage_maps_to_server_errors() {
    let store = Arc::new(FailingStore::default());
    let renderer = Arc::new(RecordingRenderer::default());
    let app = app(store.clone(), renderer.clone());

    let response = app
        .clone()
        .oneshot(post_json(r#"{"data":[{"data1":20,"data2":40}]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Error saving data");
    assert_eq!(store.appends.load(Ordering::SeqCst), 1);

    let response = app.oneshot(get("/grafico.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Error generating graph");
    assert!(renderer.last().is_none());
}

#[tokio::test]
async fn chart_window_is_validated() {
    let app = app(memory_store(), Arc::new(RecordingRenderer::default()));

    let response = app.clone().oneshot(get("/grafico.png?from=0&to=1700000000000")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get(&format!("/grafico.png?from={}", i64::MAX))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn landing_page_and_health() {
    let app = app(memory_store(), Arc::new(RecordingRenderer::default()));

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("grafico.png"));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"status":"ok"}"#);
}
