//! Server-sent-events line decoding.
//!
//! The decoder splits the byte stream on newlines, keeps a partial trailing
//! line buffered for the next read, and surfaces `data:` payloads. The
//! OpenAI-shaped helper parses each payload as a `chat.completion.chunk`.

use std::time::Duration;

use futures::StreamExt;

use switchyard_protocol::StreamChunk;

use crate::{adapter::ChunkStream, error::ProviderError};

/// One decoded SSE frame of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// The payload of a `data:` line.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental SSE line decoder.
#[derive(Default)]
pub struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    /// Feed raw bytes, returning every complete frame they finish. A partial
    /// trailing line stays buffered.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.strip_prefix(' ').unwrap_or(data);
            if data == "[DONE]" {
                frames.push(SseFrame::Done);
            } else if !data.is_empty() {
                frames.push(SseFrame::Data(data.to_string()));
            }
        }
        frames
    }
}

/// Adapt an OpenAI-shaped SSE response into a unified chunk stream.
///
/// Every read is bounded by `idle_timeout`; breaching it surfaces a
/// retryable [`ProviderError::StreamIdle`]. Payloads that do not parse as
/// chunks (keep-alives, vendor extras) are skipped.
pub fn openai_chunk_stream(response: reqwest::Response, idle_timeout: Duration) -> ChunkStream {
    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::default();
        let mut body = response.bytes_stream();

        loop {
            let next = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    yield Err(ProviderError::StreamIdle {
                        seconds: idle_timeout.as_secs(),
                    });
                    return;
                },
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    yield Err(ProviderError::Network(e.to_string()));
                    return;
                },
                // Upstream closed without [DONE]; treat as a clean end.
                None => return,
            };

            for frame in decoder.feed(&chunk) {
                match frame {
                    SseFrame::Done => return,
                    SseFrame::Data(data) => {
                        if let Ok(parsed) = serde_json::from_str::<StreamChunk>(&data) {
                            yield Ok(parsed);
                        }
                    },
                }
            }
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_complete_data_lines() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            frames,
            vec![
                SseFrame::Data("{\"a\":1}".into()),
                SseFrame::Data("{\"b\":2}".into())
            ]
        );
    }

    #[test]
    fn buffers_partial_trailing_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"par").is_empty());
        let frames = decoder.feed(b"tial\":true}\n");
        assert_eq!(frames, vec![SseFrame::Data("{\"partial\":true}".into())]);
    }

    #[test]
    fn done_terminator() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"data: [DONE]\n\n");
        assert_eq!(frames, vec![SseFrame::Done]);
    }

    #[test]
    fn ignores_non_data_lines() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"event: ping\nretry: 500\ndata: x\n");
        assert_eq!(frames, vec![SseFrame::Data("x".into())]);
    }

    #[test]
    fn handles_crlf_and_no_space() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"data:{\"x\":1}\r\n");
        assert_eq!(frames, vec![SseFrame::Data("{\"x\":1}".into())]);
    }

    #[test]
    fn split_across_many_feeds() {
        let mut decoder = SseDecoder::default();
        let payload = b"data: {\"content\":\"hello world\"}\n";
        let mut frames = Vec::new();
        for byte in payload.iter() {
            frames.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(
            frames,
            vec![SseFrame::Data("{\"content\":\"hello world\"}".into())]
        );
    }
}
