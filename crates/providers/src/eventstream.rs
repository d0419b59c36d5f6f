//! AWS EventStream (`application/vnd.amazon.eventstream`) frame decoder.
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! | total length (4) | headers length (4) | prelude CRC32 (4) |
//! | headers ... | payload ... | message CRC32 (4) |
//! ```
//!
//! The prelude CRC covers the first 8 bytes; the message CRC covers
//! everything before itself. Headers are `name-len(1) name type(1) value`
//! tuples.

use std::collections::HashMap;

use crate::error::ProviderError;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
/// Sanity bound; Bedrock frames are far smaller.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    ByteArray(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct EventStreamMessage {
    pub headers: HashMap<String, HeaderValue>,
    pub payload: Vec<u8>,
}

impl EventStreamMessage {
    /// The `:message-type` header (`event` or `exception`).
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.headers.get(":message-type").and_then(HeaderValue::as_str)
    }

    /// The `:event-type` header (e.g. `chunk`).
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.headers.get(":event-type").and_then(HeaderValue::as_str)
    }

    /// The `:exception-type` header on exception frames.
    #[must_use]
    pub fn exception_type(&self) -> Option<&str> {
        self.headers
            .get(":exception-type")
            .and_then(HeaderValue::as_str)
    }
}

/// Incremental frame decoder; partial frames stay buffered between feeds.
#[derive(Default)]
pub struct EventStreamDecoder {
    buf: Vec<u8>,
}

impl EventStreamDecoder {
    /// Feed raw bytes, returning every frame they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<EventStreamMessage>, ProviderError> {
        self.buf.extend_from_slice(bytes);

        let mut messages = Vec::new();
        loop {
            if self.buf.len() < PRELUDE_LEN {
                break;
            }
            let total_len = read_u32(&self.buf[0..4]) as usize;
            if total_len < PRELUDE_LEN + CRC_LEN || total_len > MAX_FRAME_LEN {
                return Err(ProviderError::Decode(format!(
                    "eventstream frame length {total_len} out of range"
                )));
            }
            if self.buf.len() < total_len {
                break;
            }

            let frame: Vec<u8> = self.buf.drain(..total_len).collect();
            messages.push(decode_frame(&frame)?);
        }
        Ok(messages)
    }
}

fn decode_frame(frame: &[u8]) -> Result<EventStreamMessage, ProviderError> {
    let headers_len = read_u32(&frame[4..8]) as usize;
    let prelude_crc = read_u32(&frame[8..12]);
    if crc32fast::hash(&frame[0..8]) != prelude_crc {
        return Err(ProviderError::Decode("eventstream prelude CRC mismatch".into()));
    }

    let total_len = frame.len();
    let message_crc = read_u32(&frame[total_len - CRC_LEN..]);
    if crc32fast::hash(&frame[..total_len - CRC_LEN]) != message_crc {
        return Err(ProviderError::Decode("eventstream message CRC mismatch".into()));
    }

    let headers_end = PRELUDE_LEN + headers_len;
    if headers_end > total_len - CRC_LEN {
        return Err(ProviderError::Decode(
            "eventstream header block exceeds frame".into(),
        ));
    }

    let headers = decode_headers(&frame[PRELUDE_LEN..headers_end])?;
    let payload = frame[headers_end..total_len - CRC_LEN].to_vec();

    Ok(EventStreamMessage { headers, payload })
}

fn decode_headers(mut bytes: &[u8]) -> Result<HashMap<String, HeaderValue>, ProviderError> {
    let mut headers = HashMap::new();
    while !bytes.is_empty() {
        let name_len = bytes[0] as usize;
        bytes = &bytes[1..];
        let name = take(&mut bytes, name_len)?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| ProviderError::Decode("eventstream header name not UTF-8".into()))?;

        let value_type = *bytes
            .first()
            .ok_or_else(|| ProviderError::Decode("eventstream header truncated".into()))?;
        bytes = &bytes[1..];

        let value = match value_type {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(take(&mut bytes, 1)?[0] as i8),
            3 => HeaderValue::Int16(i16::from_be_bytes(take_array(&mut bytes)?)),
            4 => HeaderValue::Int32(i32::from_be_bytes(take_array(&mut bytes)?)),
            5 => HeaderValue::Int64(i64::from_be_bytes(take_array(&mut bytes)?)),
            6 => {
                let len = u16::from_be_bytes(take_array(&mut bytes)?) as usize;
                HeaderValue::ByteArray(take(&mut bytes, len)?.to_vec())
            },
            7 => {
                let len = u16::from_be_bytes(take_array(&mut bytes)?) as usize;
                let raw = take(&mut bytes, len)?;
                HeaderValue::String(String::from_utf8(raw.to_vec()).map_err(|_| {
                    ProviderError::Decode("eventstream string header not UTF-8".into())
                })?)
            },
            8 => HeaderValue::Timestamp(i64::from_be_bytes(take_array(&mut bytes)?)),
            9 => HeaderValue::Uuid(take_array(&mut bytes)?),
            other => {
                return Err(ProviderError::Decode(format!(
                    "eventstream header type {other} unknown"
                )));
            },
        };
        headers.insert(name, value);
    }
    Ok(headers)
}

fn take<'a>(bytes: &mut &'a [u8], len: usize) -> Result<&'a [u8], ProviderError> {
    if bytes.len() < len {
        return Err(ProviderError::Decode("eventstream header truncated".into()));
    }
    let (head, rest) = bytes.split_at(len);
    *bytes = rest;
    Ok(head)
}

fn take_array<const N: usize>(bytes: &mut &[u8]) -> Result<[u8; N], ProviderError> {
    let head = take(bytes, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a well-formed frame for tests (and the bedrock decoder
    /// tests, which reuse it).
    pub(crate) fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
        let mut header_block = Vec::new();
        for (name, value) in headers {
            header_block.push(name.len() as u8);
            header_block.extend_from_slice(name.as_bytes());
            header_block.push(7u8);
            header_block.extend_from_slice(&(value.len() as u16).to_be_bytes());
            header_block.extend_from_slice(value.as_bytes());
        }

        let total_len = PRELUDE_LEN + header_block.len() + payload.len() + CRC_LEN;
        let mut frame = Vec::with_capacity(total_len);
        frame.extend_from_slice(&(total_len as u32).to_be_bytes());
        frame.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(&frame[0..8]).to_be_bytes());
        frame.extend_from_slice(&header_block);
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc32fast::hash(&frame).to_be_bytes());
        frame
    }

    #[test]
    fn round_trips_a_frame() {
        let frame = encode_frame(
            &[(":message-type", "event"), (":event-type", "chunk")],
            br#"{"bytes":"aGk="}"#,
        );
        let mut decoder = EventStreamDecoder::default();
        let messages = decoder.feed(&frame).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type(), Some("event"));
        assert_eq!(messages[0].event_type(), Some("chunk"));
        assert_eq!(messages[0].payload, br#"{"bytes":"aGk="}"#);
    }

    #[test]
    fn partial_frames_buffer_across_feeds() {
        let frame = encode_frame(&[(":message-type", "event")], b"payload");
        let mut decoder = EventStreamDecoder::default();

        let (a, b) = frame.split_at(frame.len() / 2);
        assert!(decoder.feed(a).unwrap().is_empty());
        let messages = decoder.feed(b).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"payload");
    }

    #[test]
    fn two_frames_in_one_feed() {
        let mut bytes = encode_frame(&[(":message-type", "event")], b"one");
        bytes.extend(encode_frame(&[(":message-type", "event")], b"two"));
        let mut decoder = EventStreamDecoder::default();
        let messages = decoder.feed(&bytes).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, b"one");
        assert_eq!(messages[1].payload, b"two");
    }

    #[test]
    fn corrupted_prelude_crc_rejected() {
        let mut frame = encode_frame(&[(":message-type", "event")], b"x");
        frame[9] ^= 0xff;
        let mut decoder = EventStreamDecoder::default();
        assert!(matches!(
            decoder.feed(&frame),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn corrupted_payload_fails_message_crc() {
        let mut frame = encode_frame(&[(":message-type", "event")], b"payload");
        let idx = frame.len() - CRC_LEN - 2;
        frame[idx] ^= 0xff;
        let mut decoder = EventStreamDecoder::default();
        assert!(matches!(
            decoder.feed(&frame),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn exception_frame_headers() {
        let frame = encode_frame(
            &[
                (":message-type", "exception"),
                (":exception-type", "throttlingException"),
            ],
            br#"{"message":"Too many requests"}"#,
        );
        let mut decoder = EventStreamDecoder::default();
        let messages = decoder.feed(&frame).unwrap();
        assert_eq!(messages[0].message_type(), Some("exception"));
        assert_eq!(messages[0].exception_type(), Some("throttlingException"));
    }

    #[test]
    fn absurd_length_is_an_error() {
        let mut decoder = EventStreamDecoder::default();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decoder.feed(&bytes),
            Err(ProviderError::Decode(_))
        ));
    }
}
