//! Frame assembly for the device byte stream.
//!
//! The device prints one JSON object per message, but the transport delivers
//! arbitrary chunks: a message may be split mid-token or several may arrive
//! at once. `FrameDecoder` owns the assembly buffer for one stream and turns
//! chunks into complete frames.

use std::str::FromStr;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::FramingError;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Brace-depth tokenizer aware of string literals and escapes.
    #[default]
    Balanced,
    /// Legacy rule: the trimmed buffer starts with `{` and ends with `}`.
    /// On a parse failure the buffer is kept so later chunks can extend it.
    Delimited,
}

impl FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(FramingMode::Balanced),
            "delimited" | "legacy" => Ok(FramingMode::Delimited),
            other => Err(format!("unknown framing mode `{}`", other)),
        }
    }
}

/// One complete message taken from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    payload: Value,
    raw_len: usize,
    digest: String,
}

impl Frame {
    fn new(payload: Value, raw: &[u8]) -> Self {
        Self {
            payload,
            raw_len: raw.len(),
            digest: digest(raw),
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Short sha256 of the raw frame bytes, for log correlation.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Payload handed to the gateway: the `data` member of the device's
    /// `{"data": [...]}` envelope, or the whole object when there is none.
    pub fn into_ingest_payload(self) -> Value {
        match self.payload {
            Value::Object(mut map) => match map.remove("data") {
                Some(data) => data,
                None => Value::Object(map),
            },
            other => other,
        }
    }
}

fn digest(raw: &[u8]) -> String {
    let hash = Sha256::digest(raw);
    hex::encode(&hash[..8])
}

#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    /// Next byte to inspect.
    pos: usize,
    /// Offset of the `{` opening the current object.
    start: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    mode: FramingMode,
    max_bytes: usize,
    scan: Scan,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(FramingMode::default(), DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(mode: FramingMode, max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            mode,
            max_bytes,
            scan: Scan::default(),
        }
    }

    /// Bytes received but not yet consumed by a frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.buf = Vec::new();
        self.scan = Scan::default();
    }

    /// Append a chunk and return every frame (or framing failure) it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Frame, FramingError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        match self.mode {
            FramingMode::Balanced => self.drain_balanced(&mut out),
            FramingMode::Delimited => self.drain_delimited(&mut out),
        }
        if self.buf.len() > self.max_bytes {
            self.reset();
            out.push(Err(FramingError::Overflow { limit: self.max_bytes }));
        }
        out
    }

    fn drain_balanced(&mut self, out: &mut Vec<Result<Frame, FramingError>>) {
        loop {
            if self.scan.start.is_none() {
                self.trim_leading_whitespace();
            }
            let Some(end) = self.advance() else {
                return;
            };
            let start = self.scan.start.unwrap_or(0);
            let raw: Vec<u8> = self.buf.drain(..end).collect();
            self.scan = Scan::default();

            let noise = raw[..start].iter().filter(|b| !b.is_ascii_whitespace()).count();
            if noise > 0 {
                out.push(Err(FramingError::Noise { len: noise }));
            }
            let object = &raw[start..];
            out.push(match serde_json::from_slice::<Value>(object) {
                Ok(value) => Ok(Frame::new(value, object)),
                Err(e) => Err(FramingError::Malformed { len: object.len(), reason: e.to_string() }),
            });
        }
    }

    /// Scan forward; returns the end offset (exclusive) of a closed object.
    fn advance(&mut self) -> Option<usize> {
        let s = &mut self.scan;
        while s.pos < self.buf.len() {
            let b = self.buf[s.pos];
            s.pos += 1;
            if s.start.is_none() {
                if b == b'{' {
                    s.start = Some(s.pos - 1);
                    s.depth = 1;
                }
                continue;
            }
            if s.in_string {
                if s.escaped {
                    s.escaped = false;
                } else if b == b'\\' {
                    s.escaped = true;
                } else if b == b'"' {
                    s.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => s.in_string = true,
                b'{' => s.depth += 1,
                b'}' => {
                    s.depth -= 1;
                    if s.depth == 0 {
                        return Some(s.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn trim_leading_whitespace(&mut self) {
        let n = self.buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if n > 0 {
            self.buf.drain(..n);
            self.scan.pos = self.scan.pos.saturating_sub(n);
        }
    }

    fn drain_delimited(&mut self, out: &mut Vec<Result<Frame, FramingError>>) {
        let text = String::from_utf8_lossy(&self.buf);
        let trimmed = text.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            return;
        }
        let parsed = serde_json::from_str::<Value>(trimmed);
        let result = match parsed {
            Ok(value) => Ok(Frame::new(value, trimmed.as_bytes())),
            Err(e) => Err(FramingError::Malformed { len: trimmed.len(), reason: e.to_string() }),
        };
        drop(text);
        if result.is_ok() {
            self.buf.clear();
        }
        out.push(result);
    }
}
