pub mod api;
pub mod bridge;
pub mod chart;
pub mod config;
pub mod error;
pub mod framing;
pub mod ingest;
pub mod logging;
pub mod notify;
pub mod reading;
pub mod retry;
pub mod storage;
pub mod transport;
