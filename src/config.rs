use std::str::FromStr;
use std::time::Duration;

use crate::chart::ChartSpec;
use crate::framing::{FramingMode, DEFAULT_MAX_FRAME_BYTES};
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// API server plus a bridge session feeding the in-process gateway.
    All,
    Api,
    /// Bridge only, forwarding frames to `api_url`.
    Bridge,
}

impl RunMode {
    pub fn from_env() -> Self {
        match std::env::var("MODE").unwrap_or_default().to_ascii_lowercase().as_str() {
            "api" => RunMode::Api,
            "bridge" => RunMode::Bridge,
            _ => RunMode::All,
        }
    }

    pub fn serves_api(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Api)
    }

    pub fn runs_bridge(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Bridge)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: RunMode,
    pub transport: String,
    pub device_addr: String,
    pub bind_addr: String,
    pub api_url: String,
    pub viz_url: String,
    pub open_viz: bool,
    pub sqlite_path: String,
    pub store_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub max_frame_bytes: usize,
    pub framing: FramingMode,
    pub read_chunk_bytes: usize,
    pub ingest_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub chart_width: u32,
    pub chart_height: u32,
    pub static_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::All,
            transport: "/dev/rfcomm0".to_string(),
            device_addr: "98:D3:31:F9:3F:35".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            api_url: "http://localhost:3000/sendData".to_string(),
            viz_url: "http://localhost:3000/".to_string(),
            open_viz: true,
            sqlite_path: "./readings.sqlite".to_string(),
            store_timeout_ms: 5000,
            http_timeout_ms: 5000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            framing: FramingMode::Balanced,
            read_chunk_bytes: 1024,
            ingest_retries: 3,
            retry_base_ms: 100,
            retry_max_ms: 5000,
            chart_width: 800,
            chart_height: 600,
            static_dir: "public".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Ok("1") | Ok("true") | Ok("yes") | Ok("on") => true,
        Ok("0") | Ok("false") | Ok("no") | Ok("off") => false,
        _ => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            mode: RunMode::from_env(),
            transport: std::env::var("TRANSPORT").unwrap_or(d.transport),
            device_addr: std::env::var("DEVICE_ADDR").unwrap_or(d.device_addr),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(d.bind_addr),
            api_url: std::env::var("API_URL").unwrap_or(d.api_url),
            viz_url: std::env::var("VIZ_URL").unwrap_or(d.viz_url),
            open_viz: env_flag("OPEN_VIZ", d.open_viz),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            store_timeout_ms: env_or("STORE_TIMEOUT_MS", d.store_timeout_ms),
            http_timeout_ms: env_or("HTTP_TIMEOUT_MS", d.http_timeout_ms),
            max_frame_bytes: env_or("MAX_FRAME_BYTES", d.max_frame_bytes),
            framing: env_or("FRAMING", d.framing),
            read_chunk_bytes: env_or("READ_CHUNK_BYTES", d.read_chunk_bytes),
            ingest_retries: env_or("INGEST_RETRIES", d.ingest_retries),
            retry_base_ms: env_or("RETRY_BASE_MS", d.retry_base_ms),
            retry_max_ms: env_or("RETRY_MAX_MS", d.retry_max_ms),
            chart_width: env_or("CHART_WIDTH", d.chart_width),
            chart_height: env_or("CHART_HEIGHT", d.chart_height),
            static_dir: std::env::var("STATIC_DIR").unwrap_or(d.static_dir),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.ingest_retries,
            base_delay_ms: self.retry_base_ms,
            max_delay_ms: self.retry_max_ms,
            ..RetryConfig::default()
        }
    }

    pub fn chart_spec(&self) -> ChartSpec {
        ChartSpec::with_size(self.chart_width, self.chart_height)
    }
}
