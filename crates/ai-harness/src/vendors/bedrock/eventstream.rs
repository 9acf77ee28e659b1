//! `application/vnd.amazon.eventstream` framing.
//!
//! A frame is a 12-byte prelude (total length, headers length, prelude CRC),
//! typed headers, a payload and a trailing message CRC. Both CRC32s are
//! verified; only string headers are kept.

use std::collections::VecDeque;

use futures::{Stream, StreamExt as _, stream};

use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::ByteStream;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Default)]
pub(crate) struct FrameDecoder {
    buf: Vec<u8>,
}

fn read_u32(bytes: &[u8]) -> usize {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

/// Checks the big-endian CRC32 stored right after `covered`.
fn verify_crc(what: &str, covered: &[u8], stored: &[u8]) -> Result<(), String> {
    let expected = crc32fast::hash(covered);
    let found = read_u32(stored) as u32;
    if expected == found {
        Ok(())
    } else {
        Err(format!("{what} checksum mismatch (expected {expected:#010x}, found {found:#010x})"))
    }
}

fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8], String> {
    if bytes.len() < n {
        return Err("truncated frame header".into());
    }
    let (head, rest) = bytes.split_at(n);
    *bytes = rest;
    Ok(head)
}

fn parse_headers(mut bytes: &[u8]) -> Result<Vec<(String, String)>, String> {
    let mut headers = Vec::new();
    while !bytes.is_empty() {
        let name_len = usize::from(take(&mut bytes, 1)?[0]);
        let name = String::from_utf8_lossy(take(&mut bytes, name_len)?).into_owned();
        let value_type = take(&mut bytes, 1)?[0];
        let fixed_len = match value_type {
            0 | 1 => 0,
            2 => 1,
            3 => 2,
            4 => 4,
            5 | 8 => 8,
            9 => 16,
            6 | 7 => {
                let len = take(&mut bytes, 2)?;
                let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
                let value = take(&mut bytes, len)?;
                if value_type == 7 {
                    headers.push((name, String::from_utf8_lossy(value).into_owned()));
                }
                continue;
            }
            other => return Err(format!("unknown header value type {other}")),
        };
        take(&mut bytes, fixed_len)?;
    }
    Ok(headers)
}

impl FrameDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, String> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while self.buf.len() >= PRELUDE_LEN {
            verify_crc("prelude", &self.buf[..8], &self.buf[8..PRELUDE_LEN])?;
            let total_len = read_u32(&self.buf[0..4]);
            let headers_len = read_u32(&self.buf[4..8]);
            if total_len < PRELUDE_LEN + headers_len + CRC_LEN || total_len > MAX_FRAME_LEN {
                return Err(format!("invalid frame lengths (total {total_len}, headers {headers_len})"));
            }
            if self.buf.len() < total_len {
                break;
            }
            let frame: Vec<u8> = self.buf.drain(..total_len).collect();
            let (body, crc) = frame.split_at(total_len - CRC_LEN);
            verify_crc("message", body, crc)?;
            let headers_end = PRELUDE_LEN + headers_len;
            frames.push(Frame {
                headers: parse_headers(&frame[PRELUDE_LEN..headers_end])?,
                payload: frame[headers_end..total_len - CRC_LEN].to_vec(),
            });
        }
        Ok(frames)
    }

    pub fn has_partial_frame(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Decodes `body` into frames in arrival order.
pub(crate) fn frames(
    provider: ProviderId,
    body: ByteStream,
) -> impl Stream<Item = Result<Frame, ProviderError>> + Send {
    struct State {
        provider: ProviderId,
        body: ByteStream,
        decoder: FrameDecoder,
        pending: VecDeque<Frame>,
        done: bool,
    }

    stream::try_unfold(
        State {
            provider,
            body,
            decoder: FrameDecoder::default(),
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
                    Some(Ok(chunk)) => {
                        let frames = state
                            .decoder
                            .push_chunk(&chunk)
                            .map_err(|e| ProviderError::protocol(state.provider.clone(), e))?;
                        state.pending.extend(frames);
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        if state.decoder.has_partial_frame() {
                            return Err(ProviderError::network(
                                state.provider.clone(),
                                "stream ended inside an event frame",
                            ));
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}

/// Encodes a frame with string headers for tests.
#[cfg(test)]
pub(crate) fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut encoded_headers = Vec::new();
    for (name, value) in headers {
        encoded_headers.push(name.len() as u8);
        encoded_headers.extend_from_slice(name.as_bytes());
        encoded_headers.push(7);
        encoded_headers.extend_from_slice(&(value.len() as u16).to_be_bytes());
        encoded_headers.extend_from_slice(value.as_bytes());
    }
    let total = PRELUDE_LEN + encoded_headers.len() + payload.len() + CRC_LEN;
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.extend_from_slice(&(encoded_headers.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&frame).to_be_bytes());
    frame.extend_from_slice(&encoded_headers);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&crc32fast::hash(&frame).to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendors::sse::body_from_chunks;

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let bytes = encode_frame(
            &[(":message-type", "event"), (":event-type", "messageStart")],
            br#"{"role":"assistant"}"#,
        );
        let mut decoder = FrameDecoder::default();
        assert!(decoder.push_chunk(&bytes[..10]).expect("chunk").is_empty());
        assert!(decoder.push_chunk(&bytes[10..30]).expect("chunk").is_empty());
        let frames = decoder.push_chunk(&bytes[30..]).expect("chunk");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header(":event-type"), Some("messageStart"));
        assert_eq!(frames[0].payload, br#"{"role":"assistant"}"#);
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn non_string_headers_are_skipped() {
        let mut headers = vec![4u8];
        headers.extend_from_slice(b"flag");
        headers.push(0);
        headers.push(3);
        headers.extend_from_slice(b"num");
        headers.push(4);
        headers.extend_from_slice(&7u32.to_be_bytes());
        headers.push(1);
        headers.extend_from_slice(b"s");
        headers.push(7);
        headers.extend_from_slice(&2u16.to_be_bytes());
        headers.extend_from_slice(b"ok");
        assert_eq!(parse_headers(&headers).expect("headers"), vec![("s".to_string(), "ok".to_string())]);
    }

    #[test]
    fn impossible_lengths_are_rejected() {
        let mut decoder = FrameDecoder::default();
        let mut bytes = 8u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&crc32fast::hash(&bytes).to_be_bytes());
        let err = decoder.push_chunk(&bytes).expect_err("lengths");
        assert!(err.contains("invalid frame lengths"), "{err}");
    }

    #[test]
    fn corrupted_frames_fail_their_checksum() {
        let bytes = encode_frame(&[(":event-type", "messageStop")], br#"{"stopReason":"end_turn"}"#);

        let mut payload_flip = bytes.clone();
        let last_payload_byte = payload_flip.len() - CRC_LEN - 1;
        payload_flip[last_payload_byte] ^= 0x01;
        let err = FrameDecoder::default().push_chunk(&payload_flip).expect_err("message crc");
        assert!(err.starts_with("message checksum mismatch"), "{err}");

        let mut prelude_flip = bytes.clone();
        prelude_flip[PRELUDE_LEN - 1] ^= 0x80;
        let err = FrameDecoder::default().push_chunk(&prelude_flip).expect_err("prelude crc");
        assert!(err.starts_with("prelude checksum mismatch"), "{err}");

        assert_eq!(FrameDecoder::default().push_chunk(&bytes).expect("intact").len(), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_a_protocol_error() {
        let mut bytes = encode_frame(&[(":event-type", "messageStop")], b"{}");
        let end = bytes.len() - 1;
        bytes[end] ^= 0xff;
        let body = body_from_chunks(vec![bytes]);
        let frames: Vec<_> = frames(ProviderId::new("amazon-bedrock"), body).collect().await;
        assert!(matches!(frames.as_slice(), [Err(ProviderError::Protocol { .. })]));
    }

    #[tokio::test]
    async fn truncated_body_is_a_network_error() {
        let bytes = encode_frame(&[(":event-type", "messageStop")], b"{}");
        let body = body_from_chunks(vec![bytes[..bytes.len() - 3].to_vec()]);
        let frames: Vec<_> = frames(ProviderId::new("amazon-bedrock"), body).collect().await;
        assert!(matches!(frames.as_slice(), [Err(ProviderError::Network { .. })]));
    }
}
