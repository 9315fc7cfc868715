//! Incremental decoder for the streaming query response body.
//!
//! The body is plain text: zero or more content lines, optionally terminated
//! by a single `__META__<json>` line carrying the source attributions. Chunk
//! boundaries are arbitrary, so the decoder holds partial UTF-8 sequences
//! and a possibly-split sentinel line across `feed` calls.

use std::pin::Pin;

use futures::Stream;
use futures_util::StreamExt;
use reqwest::Response;

use crate::error::{QaError, Result};
use crate::models::{MetaRecord, StreamFrame};

/// Sentinel prefix of the metadata line terminating a streamed answer.
pub const META_SENTINEL: &str = "__META__";

pub type QaFrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame>> + Send>>;

/// Stateful chunk decoder. `feed` accepts raw transport bytes and returns the
/// frames completed by that chunk; `finish` flushes whatever is still held
/// once the transport ends.
pub struct StreamDecoder {
    /// Raw bytes not yet decoded (at most one incomplete UTF-8 sequence).
    pending: Vec<u8>,
    /// Unterminated trailing segment, held only while it may still turn out
    /// to be the sentinel line.
    held_line: String,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            held_line: String::new(),
            finished: false,
        }
    }

    /// The metadata record was seen (or dropped as malformed); no further
    /// content is surfaced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        if self.finished {
            return Vec::new();
        }
        self.pending.extend_from_slice(chunk);
        let text = self.take_decodable();
        if text.is_empty() {
            return Vec::new();
        }
        self.process_text(&text)
    }

    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if self.finished {
            self.pending.clear();
            self.held_line.clear();
            return Vec::new();
        }

        let mut frames = Vec::new();
        if !self.pending.is_empty() {
            // Incomplete UTF-8 at end of transport decodes lossily.
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            frames.extend(self.process_text(&tail));
            if self.finished {
                return frames;
            }
        }

        let last = std::mem::take(&mut self.held_line);
        if !last.is_empty() {
            if let Some(payload) = last.strip_prefix(META_SENTINEL) {
                if let Some(meta) = parse_meta(payload) {
                    frames.push(StreamFrame::Meta(meta));
                }
            } else {
                // A sentinel prefix that never completed is ordinary text.
                frames.push(StreamFrame::Content(last));
            }
        }
        self.finished = true;
        frames
    }

    /// Decode the longest valid UTF-8 prefix of `pending`, holding back an
    /// incomplete trailing sequence for the next chunk.
    fn take_decodable(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid_up_to + invalid);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn process_text(&mut self, text: &str) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        let mut working = std::mem::take(&mut self.held_line);
        working.push_str(text);

        let mut rest = working.as_str();
        while let Some(pos) = rest.find('\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];
            if line.is_empty() {
                continue;
            }
            if let Some(payload) = line.strip_prefix(META_SENTINEL) {
                self.finished = true;
                if let Some(meta) = parse_meta(payload) {
                    frames.push(StreamFrame::Meta(meta));
                }
                return frames;
            }
            frames.push(StreamFrame::Content(line.to_string()));
        }

        if !rest.is_empty() {
            if may_be_sentinel(rest) {
                self.held_line = rest.to_string();
            } else {
                frames.push(StreamFrame::Content(rest.to_string()));
            }
        }
        frames
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// True while the segment could still grow into a `__META__` line.
fn may_be_sentinel(segment: &str) -> bool {
    segment.starts_with(META_SENTINEL) || META_SENTINEL.starts_with(segment)
}

fn parse_meta(payload: &str) -> Option<MetaRecord> {
    match serde_json::from_str::<MetaRecord>(payload) {
        Ok(meta) => Some(meta),
        Err(err) => {
            log::warn!("dropping malformed __META__ record: {err}");
            None
        }
    }
}

/// Adapt a streaming HTTP [`Response`] into a lazy frame sequence. The body
/// read stops at the metadata record; transport errors surface as
/// [`QaError::Stream`].
pub fn frames_from_response(response: Response) -> QaFrameStream {
    Box::pin(async_stream::stream! {
        let mut decoder = StreamDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.feed(&bytes) {
                        yield Ok(frame);
                    }
                    if decoder.is_finished() {
                        return;
                    }
                }
                Err(err) => {
                    yield Err(QaError::Stream(err.to_string()));
                    return;
                }
            }
        }
        for frame in decoder.finish() {
            yield Ok(frame);
        }
    })
}
