//! Forwarding bridge: one session per transport connection.
//!
//! The session loop reads chunks in arrival order and decodes them
//! synchronously. Each complete frame is ingested on its own task, so slow
//! store writes never hold up decoding; the one-shot notification fires after
//! the first frame that is accepted.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::{JoinError, JoinSet};

use crate::error::{FramingError, IngestError, TransportError};
use crate::framing::{Frame, FrameDecoder};
use crate::ingest::{Accepted, Delivery, Ingest};
use crate::logging::{self, error, info, log_session_summary, log_state_change, obj, v_str, warn, Domain};
use crate::notify::Notifier;
use crate::retry::{retry_async, RetryConfig};
use crate::transport::TransportTarget;

pub const DEFAULT_READ_CHUNK: usize = 1024;

fn new_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("s-{}", suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Streaming,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connected => "connected",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        }
    }

    fn can_become(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Connected)
                | (SessionState::Idle, SessionState::Closed)
                | (SessionState::Connected, SessionState::Streaming)
                | (SessionState::Connected, SessionState::Closed)
                | (SessionState::Streaming, SessionState::Closed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    EndOfStream,
    Shutdown,
    Transport(String),
    ConnectFailed(String),
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::EndOfStream => "end_of_stream",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Transport(_) => "transport_error",
            CloseReason::ConnectFailed(_) => "connect_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: String,
    pub close_reason: CloseReason,
    pub chunks: u64,
    pub frames: u64,
    pub framing_errors: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
    /// Ingestions still running when the stream closed; awaited before the
    /// report was produced.
    pub pending_at_close: u64,
    pub notified: bool,
}

#[derive(Debug, Default)]
struct SessionStats {
    chunks: AtomicU64,
    frames: AtomicU64,
    framing_errors: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

pub struct Bridge {
    session_id: String,
    state: SessionState,
    decoder: FrameDecoder,
    ingest: Arc<dyn Ingest>,
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
    read_chunk: usize,
    notified: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
    inflight: JoinSet<()>,
}

impl Bridge {
    pub fn new(
        decoder: FrameDecoder,
        ingest: Arc<dyn Ingest>,
        notifier: Arc<dyn Notifier>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            session_id: new_session_id(),
            state: SessionState::Idle,
            decoder,
            ingest,
            notifier,
            retry,
            read_chunk: DEFAULT_READ_CHUNK,
            notified: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SessionStats::default()),
            inflight: JoinSet::new(),
        }
    }

    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_become(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        log_state_change(&self.session_id, self.state.as_str(), next.as_str());
        self.state = next;
    }

    /// Connect to `target`, then stream until close.
    pub async fn connect_and_run<S>(mut self, target: &TransportTarget, shutdown: S) -> SessionReport
    where
        S: Future<Output = ()>,
    {
        info(
            Domain::Transport,
            "connecting",
            obj(&[("session_id", v_str(&self.session_id)), ("target", v_str(&target.to_string()))]),
        );
        match target.connect().await {
            Ok(stream) => self.run(stream, shutdown).await,
            Err(err) => {
                error(
                    Domain::Transport,
                    "connect_failed",
                    obj(&[("session_id", v_str(&self.session_id)), ("error", v_str(&err.to_string()))]),
                );
                self.transition(SessionState::Closed);
                self.finish(CloseReason::ConnectFailed(err.to_string()), Instant::now()).await
            }
        }
    }

    /// Drive an already connected stream until end of stream, a read error,
    /// or `shutdown` resolves. In-flight ingestions are awaited before the
    /// report is returned.
    pub async fn run<R, S>(mut self, mut stream: R, shutdown: S) -> SessionReport
    where
        R: AsyncRead + Unpin,
        S: Future<Output = ()>,
    {
        let started = Instant::now();
        self.transition(SessionState::Connected);
        self.transition(SessionState::Streaming);

        tokio::pin!(shutdown);
        let mut buf = vec![0u8; self.read_chunk];
        let reason = loop {
            tokio::select! {
                biased;
                Some(joined) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    self.on_ingest_joined(joined);
                }
                _ = &mut shutdown => break CloseReason::Shutdown,
                read = stream.read(&mut buf) => match read {
                    Ok(0) => break CloseReason::EndOfStream,
                    Ok(n) => self.on_chunk(&buf[..n]),
                    Err(err) => {
                        let err = TransportError::Read(err);
                        error(
                            Domain::Transport,
                            "read_failed",
                            obj(&[("session_id", v_str(&self.session_id)), ("error", v_str(&err.to_string()))]),
                        );
                        break CloseReason::Transport(err.to_string());
                    }
                },
            }
        };

        drop(stream);
        if !self.decoder.is_empty() {
            warn(
                Domain::Frame,
                "partial_frame_dropped",
                obj(&[
                    ("session_id", v_str(&self.session_id)),
                    ("bytes", json!(self.decoder.buffered().len())),
                ]),
            );
        }
        self.decoder.reset();
        self.transition(SessionState::Closed);
        self.finish(reason, started).await
    }

    fn on_chunk(&mut self, chunk: &[u8]) {
        self.stats.chunks.fetch_add(1, Ordering::Relaxed);
        logging::debug(
            Domain::Transport,
            "chunk",
            obj(&[("session_id", v_str(&self.session_id)), ("bytes", json!(chunk.len()))]),
        );
        for result in self.decoder.feed(chunk) {
            match result {
                Ok(frame) => self.dispatch(frame),
                Err(err) => self.on_framing_error(err),
            }
        }
    }

    fn on_framing_error(&self, err: FramingError) {
        self.stats.framing_errors.fetch_add(1, Ordering::Relaxed);
        warn(
            Domain::Frame,
            "framing_error",
            obj(&[("session_id", v_str(&self.session_id)), ("error", v_str(&err.to_string()))]),
        );
    }

    fn dispatch(&mut self, frame: Frame) {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        let session_id = self.session_id.clone();
        let digest = frame.digest().to_string();
        logging::debug(
            Domain::Frame,
            "frame",
            obj(&[
                ("session_id", v_str(&session_id)),
                ("frame_digest", v_str(&digest)),
                ("bytes", json!(frame.raw_len())),
            ]),
        );

        // One delivery per frame: retries reuse its id and timestamp.
        let delivery = Delivery::new(frame.into_ingest_payload());
        let ingest = self.ingest.clone();
        let notifier = self.notifier.clone();
        let notified = self.notified.clone();
        let stats = self.stats.clone();
        let retry = self.retry.clone();

        self.inflight.spawn(async move {
            let outcome = retry_async(&retry, "ingest", IngestError::is_retryable, || {
                ingest.ingest(&delivery)
            })
            .await;

            match outcome {
                Ok(accepted) => {
                    stats.accepted.fetch_add(1, Ordering::Relaxed);
                    let status = match &accepted {
                        Accepted::Stored { receipt, .. } => receipt.id.clone(),
                        Accepted::Forwarded { status } => status.to_string(),
                    };
                    info(
                        Domain::Ingest,
                        "frame_accepted",
                        obj(&[
                            ("session_id", v_str(&session_id)),
                            ("frame_digest", v_str(&digest)),
                            ("record_id", v_str(&delivery.id)),
                            ("outcome", v_str(&status)),
                        ]),
                    );
                    if !notified.swap(true, Ordering::SeqCst) {
                        if let Err(err) = notifier.notify().await {
                            warn(
                                Domain::System,
                                "notify_failed",
                                obj(&[("session_id", v_str(&session_id)), ("error", v_str(&err.to_string()))]),
                            );
                        }
                    }
                }
                Err(err) => {
                    let counter = if err.is_rejection() { &stats.rejected } else { &stats.failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                    warn(
                        Domain::Ingest,
                        "frame_dropped",
                        obj(&[
                            ("session_id", v_str(&session_id)),
                            ("frame_digest", v_str(&digest)),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                }
            }
        });
    }

    fn on_ingest_joined(&self, joined: Result<(), JoinError>) {
        if let Err(err) = joined {
            error(
                Domain::Ingest,
                "ingest_task_failed",
                obj(&[("session_id", v_str(&self.session_id)), ("error", v_str(&err.to_string()))]),
            );
        }
    }

    async fn finish(mut self, close_reason: CloseReason, started: Instant) -> SessionReport {
        let pending_at_close = self.inflight.len() as u64;
        while let Some(joined) = self.inflight.join_next().await {
            self.on_ingest_joined(joined);
        }

        let s = &self.stats;
        let report = SessionReport {
            session_id: self.session_id.clone(),
            close_reason,
            chunks: s.chunks.load(Ordering::Relaxed),
            frames: s.frames.load(Ordering::Relaxed),
            framing_errors: s.framing_errors.load(Ordering::Relaxed),
            accepted: s.accepted.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            pending_at_close,
            notified: self.notified.load(Ordering::SeqCst),
        };
        log_session_summary(
            &report.session_id,
            report.close_reason.as_str(),
            started.elapsed().as_millis() as u64,
            report.chunks,
            report.frames,
            report.framing_errors,
            report.accepted,
            report.rejected,
            report.failed,
        );
        report
    }
}
