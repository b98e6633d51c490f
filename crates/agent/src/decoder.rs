//! Incremental decoder for the agent's `data: `-framed response stream.
//!
//! Bytes arrive in arbitrary chunks. The decoder keeps the incomplete tail of the
//! current line (and any incomplete UTF-8 sequence) between chunks, so the decoded
//! events never depend on where the transport happened to split the body.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt, stream};
use serde_json::Value;

pub const FRAME_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const TEXT_DELTA_TYPE: &str = "text-delta";
pub const FINISH_TYPE: &str = "finish";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Fragment to append to the in-flight assistant message.
    TextDelta(String),
    /// The agent finished this response.
    Finished,
    /// A frame whose payload was not valid JSON; it was skipped.
    ParseWarning(String),
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
    terminated: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a `finish` frame was decoded. No further events are produced.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feeds one chunk and returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedEvent> {
        if self.terminated {
            return Vec::new();
        }

        self.decode_utf8(chunk);
        self.drain_complete_lines()
    }

    /// Signals end of data. An unterminated trailing line cannot be a complete frame.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() || !self.pending_bytes.is_empty() {
            tracing::debug!(
                buffered_chars = self.buffer.len(),
                pending_bytes = self.pending_bytes.len(),
                "discarding unterminated trailing data at end of stream"
            );
        }
        self.buffer.clear();
        self.pending_bytes.clear();
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);
        let input = std::mem::take(&mut self.pending_bytes);
        let mut rest = input.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match error.error_len() {
                        Some(invalid_len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid_len..];
                        }
                        // Sequence continues in the next chunk.
                        None => {
                            self.pending_bytes = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn drain_complete_lines(&mut self) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return events;
        };

        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);

        for line in complete.split('\n') {
            let Some(event) = decode_line(line) else {
                continue;
            };

            let finished = event == DecodedEvent::Finished;
            events.push(event);
            if finished {
                self.terminated = true;
                self.buffer.clear();
                self.pending_bytes.clear();
                break;
            }
        }

        events
    }
}

/// Decodes one complete line. Returns `None` for lines that carry no event.
pub fn decode_line(line: &str) -> Option<DecodedEvent> {
    let payload = line.strip_prefix(FRAME_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        tracing::trace!("agent stream sent done marker");
        return None;
    }

    let record = match serde_json::from_str::<Value>(payload) {
        Ok(record) => record,
        Err(error) => {
            tracing::warn!(error = %error, payload, "skipping malformed agent frame");
            return Some(DecodedEvent::ParseWarning(payload.to_string()));
        }
    };

    match record.get("type").and_then(Value::as_str) {
        Some(TEXT_DELTA_TYPE) => record
            .get("delta")
            .and_then(Value::as_str)
            .filter(|delta| !delta.is_empty())
            .map(|delta| DecodedEvent::TextDelta(delta.to_string())),
        Some(FINISH_TYPE) => Some(DecodedEvent::Finished),
        other => {
            tracing::trace!(frame_type = ?other, "ignoring agent frame type");
            None
        }
    }
}

struct DecodeState<S> {
    body: Option<Pin<Box<S>>>,
    decoder: StreamDecoder,
    ready: VecDeque<DecodedEvent>,
}

/// Turns a chunked response body into a lazy event stream.
///
/// The body is dropped as soon as a `finish` frame arrives, the body ends, or it
/// yields an error (which is passed through once). Dropping the returned stream
/// drops the body as well.
pub fn decode<S, B, E>(body: S) -> impl Stream<Item = Result<DecodedEvent, E>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Send,
{
    let state = DecodeState {
        body: Some(Box::pin(body)),
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }

            let body = state.body.as_mut()?;
            let next = body.next().await;
            match next {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.ready.extend(events);
                    if state.decoder.is_terminated() {
                        state.body = None;
                    }
                }
                Some(Err(error)) => {
                    state.body = None;
                    return Some((Err(error), state));
                }
                None => {
                    state.decoder.finish();
                    state.body = None;
                }
            }
        }
    })
}
