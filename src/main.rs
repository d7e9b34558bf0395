use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sensorlink::api::{self, AppState};
use sensorlink::bridge::Bridge;
use sensorlink::chart::{PngChartRenderer, RenderPipeline};
use sensorlink::config::{Config, RunMode};
use sensorlink::framing::FrameDecoder;
use sensorlink::ingest::{Gateway, HttpIngestClient, Ingest};
use sensorlink::logging::{error, info, obj, v_str, Domain};
use sensorlink::notify::{BrowserOpener, NoopNotifier, Notifier};
use sensorlink::storage::{ReadingStore, SqliteStore};
use sensorlink::transport::TransportTarget;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Resolves once the shutdown flag flips (or its sender is gone).
fn shutdown_signal(mut rx: watch::Receiver<bool>) -> impl std::future::Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    info(
        Domain::System,
        "startup",
        obj(&[
            ("mode", v_str(&format!("{:?}", cfg.mode).to_lowercase())),
            ("transport", v_str(&cfg.transport)),
            ("device_addr", v_str(&cfg.device_addr)),
            ("bind_addr", v_str(&cfg.bind_addr)),
            ("framing", v_str(&format!("{:?}", cfg.framing).to_lowercase())),
            ("ingest_retries", json!(cfg.ingest_retries)),
        ]),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();

    let store: Option<Arc<dyn ReadingStore>> = match cfg.mode {
        RunMode::All | RunMode::Api => {
            let store = SqliteStore::open(&cfg.sqlite_path, cfg.store_timeout())
                .with_context(|| format!("opening store at {}", cfg.sqlite_path))?;
            info(Domain::Store, "opened", obj(&[("path", v_str(&cfg.sqlite_path))]));
            let store: Arc<dyn ReadingStore> = Arc::new(store);
            Some(store)
        }
        RunMode::Bridge => None,
    };

    if let (true, Some(store)) = (cfg.mode.serves_api(), store.clone()) {
        let state = AppState {
            gateway: Arc::new(Gateway::new(store.clone())),
            charts: Arc::new(RenderPipeline::new(store, Arc::new(PngChartRenderer), cfg.chart_spec())),
            static_dir: PathBuf::from(&cfg.static_dir),
        };
        let listener = TcpListener::bind(&cfg.bind_addr)
            .await
            .with_context(|| format!("binding {}", cfg.bind_addr))?;
        let shutdown = shutdown_signal(shutdown_rx.clone());
        tasks.spawn(async move {
            if let Err(err) = api::serve(listener, state, shutdown).await {
                error(Domain::Http, "server_failed", obj(&[("error", v_str(&err.to_string()))]));
            }
        });
    }

    if cfg.mode.runs_bridge() {
        let ingest: Arc<dyn Ingest> = match &store {
            Some(store) => Arc::new(Gateway::new(store.clone())),
            None => Arc::new(HttpIngestClient::new(&cfg.api_url, cfg.http_timeout())?),
        };
        let notifier: Arc<dyn Notifier> = if cfg.open_viz {
            Arc::new(BrowserOpener::new(cfg.viz_url.clone()))
        } else {
            Arc::new(NoopNotifier)
        };
        let target: TransportTarget = cfg.transport.parse()?;
        let bridge = Bridge::new(
            FrameDecoder::new(cfg.framing, cfg.max_frame_bytes),
            ingest,
            notifier,
            cfg.retry(),
        )
        .with_read_chunk(cfg.read_chunk_bytes);
        let shutdown = shutdown_signal(shutdown_rx.clone());
        let standalone = cfg.mode == RunMode::Bridge;
        let done_tx = shutdown_tx.clone();
        tasks.spawn(async move {
            let report = bridge.connect_and_run(&target, shutdown).await;
            info(
                Domain::System,
                "bridge_closed",
                obj(&[
                    ("session_id", v_str(&report.session_id)),
                    ("close_reason", v_str(report.close_reason.as_str())),
                    ("notified", json!(report.notified)),
                ]),
            );
            // No reconnect: a bridge-only process is done once its session is.
            if standalone {
                let _ = done_tx.send(true);
            }
        });
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error(Domain::System, "signal_failed", obj(&[("error", v_str(&err.to_string()))]));
            }
            info(Domain::System, "shutdown_requested", obj(&[]));
        }
        _ = shutdown_signal(shutdown_rx.clone()) => {}
    }
    let _ = shutdown_tx.send(true);

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error(Domain::System, "task_failed", obj(&[("error", v_str(&err.to_string()))]));
        }
    }
    info(Domain::System, "exit", obj(&[]));
    Ok(())
}
