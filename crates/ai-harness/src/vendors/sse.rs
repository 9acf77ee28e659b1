//! Server-Sent-Events framing over a response byte stream.

use std::collections::VecDeque;

use futures::{Stream, StreamExt as _, TryStreamExt as _, stream};

use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::ByteStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// `true` for empty keep-alives and the OpenAI `[DONE]` sentinel.
    pub fn is_sentinel(&self) -> bool {
        let data = self.data.trim();
        data.is_empty() || data == "[DONE]"
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a final frame the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Decodes `body` into SSE frames in arrival order.
pub(crate) fn frames(body: ByteStream) -> impl Stream<Item = Result<SseFrame, ProviderError>> + Send {
    struct State {
        body: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<SseFrame>,
        done: bool,
    }

    stream::try_unfold(
        State {
            body,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => state.pending.extend(state.decoder.push_chunk(&chunk)),
                    Some(Err(e)) => return Err(e),
                    None => {
                        state.done = true;
                        state.pending.extend(state.decoder.finish());
                    }
                }
            }
        },
    )
}

/// Decodes `body` into JSON payloads, skipping keep-alives and `[DONE]`.
pub(crate) fn json_events(
    provider: ProviderId,
    body: ByteStream,
) -> impl Stream<Item = Result<serde_json::Value, ProviderError>> + Send {
    frames(body).try_filter_map(move |frame| {
        let parsed = if frame.is_sentinel() {
            Ok(None)
        } else {
            frame.json().map(Some).map_err(|e| {
                ProviderError::protocol(provider.clone(), format!("invalid event payload: {e}"))
            })
        };
        futures::future::ready(parsed)
    })
}

#[cfg(test)]
pub(crate) fn body_from_chunks(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(stream::iter(
        chunks.into_iter().map(|c| Ok(bytes::Bytes::from(c))),
    ))
}

/// Builds an SSE body from `(event, json)` pairs for adapter tests.
#[cfg(test)]
pub(crate) fn sse_body(frames: &[(Option<&str>, serde_json::Value)]) -> ByteStream {
    let mut text = String::new();
    for (event, data) in frames {
        if let Some(event) = event {
            text.push_str(&format!("event: {event}\n"));
        }
        text.push_str(&format!("data: {data}\n\n"));
    }
    // Split mid-frame to exercise chunk reassembly.
    let bytes = text.into_bytes();
    let mid = bytes.len() / 2;
    body_from_chunks(vec![bytes[..mid].to_vec(), bytes[mid..].to_vec()])
}
