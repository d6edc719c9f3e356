//! Inbound stream decoding.
//!
//! Turns an arbitrarily chunked byte stream into JSON-RPC messages. Local
//! workers speak newline-delimited JSON; container exec sessions wrap the
//! same lines in multiplexed frames, with stderr interleaved.

use crate::error::McpError;
use bytes::{Buf, BytesMut};
use serde_json::Value;
use toolwire_container::{FrameCodec, StreamKind};
use tokio_util::codec::Decoder;
use tracing::{debug, error, warn};

/// Longest preview of a rejected line that ends up in the logs.
const PREVIEW_LEN: usize = 200;

/// Longest stdout line accepted by [`LineDecoder::default`].
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024 * 1024;

/// Stderr text without a newline is flushed as a diagnostic at this size.
const MAX_DIAGNOSTIC_LEN: usize = 64 * 1024;

/// One decoded unit of inbound data.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A complete JSON document from the worker's stdout.
    Message(Value),
    /// A line of worker stderr text.
    Diagnostic(String),
}

/// Incremental decoder over a chunked byte stream.
///
/// Feeding the same bytes split at different points yields the same
/// sequence of items.
pub trait InboundDecoder: Send {
    /// Append a chunk and return every item it completes.
    fn feed(&mut self, chunk: &[u8]) -> Vec<Inbound>;
}

/// Newline-delimited JSON decoder.
///
/// A line longer than the limit is dropped whole, including the part
/// that arrives after the limit was hit.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    max_line_len: usize,
    skipping: bool,
    discarded: u64,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop lines longer than `max` bytes.
    pub fn with_max_line_len(max: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_len: max,
            skipping: false,
            discarded: 0,
        }
    }

    /// Number of lines dropped because they were not valid JSON or too long.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn reject_long_line(&mut self, len: usize) {
        self.discarded += 1;
        warn!(
            len,
            limit = self.max_line_len,
            "Discarding line over the length limit"
        );
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Inbound>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        match serde_json::from_slice::<Value>(line) {
            Ok(value) => out.push(Inbound::Message(value)),
            Err(e) => {
                self.discarded += 1;
                let err = McpError::ProtocolParse(e.to_string());
                warn!(
                    error = %err,
                    line = %preview(line),
                    "Discarding unparseable line"
                );
            }
        }
    }
}

impl InboundDecoder for LineDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Inbound> {
        // Everything already buffered is known to hold no newline.
        let mut start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let pos = start + offset;
            start = 0;
            let line = self.buffer.split_to(pos + 1);
            if self.skipping {
                self.skipping = false;
            } else if pos > self.max_line_len {
                self.reject_long_line(pos);
            } else {
                self.decode_line(&line[..pos], &mut out);
            }
        }

        if self.buffer.len() > self.max_line_len {
            if !self.skipping {
                self.reject_long_line(self.buffer.len());
                self.skipping = true;
            }
            self.buffer.clear();
        }
        out
    }
}

/// Decoder for the container engine's multiplexed stream format.
///
/// Stdout payloads are fed through an inner [`LineDecoder`], so a JSON line
/// may span several frames. Stderr payloads are collected the same way and
/// become diagnostics line by line.
#[derive(Debug, Default)]
pub struct MultiplexedDecoder {
    buffer: BytesMut,
    codec: FrameCodec,
    stdout: LineDecoder,
    stderr: BytesMut,
}

impl MultiplexedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom frame codec (for example a smaller payload limit).
    pub fn with_codec(codec: FrameCodec) -> Self {
        Self {
            codec,
            ..Self::default()
        }
    }

    /// Number of stdout lines dropped because they were not valid JSON.
    pub fn discarded(&self) -> u64 {
        self.stdout.discarded()
    }

    /// Bytes of an incomplete frame held back.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn feed_stderr(&mut self, payload: &[u8], out: &mut Vec<Inbound>) {
        let mut start = self.stderr.len();
        self.stderr.extend_from_slice(payload);

        while let Some(offset) = self.stderr[start..].iter().position(|b| *b == b'\n') {
            let line = self.stderr.split_to(start + offset + 1);
            start = 0;
            push_diagnostic(&line, out);
        }
        while self.stderr.len() > MAX_DIAGNOSTIC_LEN {
            let line = self.stderr.split_to(MAX_DIAGNOSTIC_LEN);
            push_diagnostic(&line, out);
        }
    }
}

fn push_diagnostic(line: &[u8], out: &mut Vec<Inbound>) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end();
    if !text.is_empty() {
        out.push(Inbound::Diagnostic(text.to_string()));
    }
}

impl InboundDecoder for MultiplexedDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Inbound> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            let frame = match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    // Lost sync with the frame headers; drop everything buffered.
                    error!(error = %e, dropped = self.buffer.len(), "Corrupt frame stream");
                    self.buffer.advance(self.buffer.len());
                    break;
                }
            };

            match frame.kind {
                StreamKind::Stdout => out.extend(self.stdout.feed(&frame.payload)),
                StreamKind::Stderr => self.feed_stderr(&frame.payload, &mut out),
                kind => {
                    debug!(kind = ?kind, len = frame.payload.len(), "Ignoring frame");
                }
            }
        }
        out
    }
}

fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    match text.char_indices().nth(PREVIEW_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}
