// src/gateway/ndjson.rs
//! Line framing for the progress stream body (newline-delimited JSON, `data:` prefixes tolerated).

use super::EventStream;
use crate::error::GatewayError;
use crate::models::ProgressEvent;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt;

/// Longest line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline
    scanned: usize,
    max_line: usize,
    /// Set while skipping the rest of an oversized line
    discarding: bool,
}

impl Default for NdjsonDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Feed a body chunk, returning every complete line it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if raw.len() > self.max_line {
                tracing::warn!("Dropping oversized progress frame ({} bytes)", raw.len());
                continue;
            }
            if let Some(line) = Self::clean(&raw) {
                lines.push(line);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            if !self.discarding {
                tracing::warn!(
                    "Dropping progress frame longer than {} bytes without a newline",
                    self.max_line
                );
            }
            self.discarding = true;
            self.buffer.clear();
            self.scanned = 0;
        }
        lines
    }

    /// Flush a trailing line that had no terminating newline.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        Self::clean(&raw)
    }

    fn clean(raw: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

struct StreamState<S> {
    body: S,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<ProgressEvent, GatewayError>>,
    finished: bool,
}

/// Turn a chunked response body into progress events.
///
/// A body error is yielded once as `Transport` and ends the stream. A trailing line without a
/// newline is flushed when the body ends.
pub fn decode_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = StreamState {
        body: Box::pin(body),
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for line in state.decoder.push(chunk.as_ref()) {
                        if let Some(event) = decode_event(&line) {
                            state.pending.push_back(Ok(event));
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(GatewayError::Transport(e.to_string())));
                }
                None => {
                    state.finished = true;
                    if let Some(event) = state.decoder.finish().as_deref().and_then(decode_event) {
                        state.pending.push_back(Ok(event));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Decode one framed line. Undecodable lines are logged and skipped.
pub fn decode_event(line: &str) -> Option<ProgressEvent> {
    match serde_json::from_str::<ProgressEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Skipping undecodable progress frame ({}): {}", e, line);
            None
        }
    }
}
