//! HTTP client for the streaming communicate endpoint.
//!
//! [`StreamClient::stream`] opens the POST, validates the status line, and
//! returns a typed event stream built by running every received chunk through
//! the frame decoder and the event router. The stream yields events in wire
//! order; transport failures surface inline as `Err` items so the consumer
//! can finalize the turn with partial content intact.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use reqwest::Client;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::events::TypedEvent;
use crate::models::CommunicateRequest;
use crate::router::EventRouter;
use crate::sse::FrameDecoder;

/// A pinned, boxed stream of typed events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TypedEvent, StreamError>> + Send>>;

/// Client for the streaming chat backend.
#[derive(Debug, Clone)]
pub struct StreamClient {
    url: String,
    client: Client,
}

impl StreamClient {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            url: config.communicate_url(),
            client: Client::new(),
        }
    }

    /// Open a streaming turn and return its typed event stream.
    ///
    /// A non-2xx status is returned as `Err` before any event is yielded; the
    /// response body (if readable) becomes the error message.
    pub async fn stream(&self, request: &CommunicateRequest) -> Result<EventStream, StreamError> {
        tracing::debug!(url = %self.url, conversation_id = %request.conversation_id, "opening stream");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(StreamError::http_status(status.as_u16(), message));
        }

        let bytes_stream = response.bytes_stream();

        let event_stream = stream::unfold(
            PipelineState {
                bytes: Box::pin(bytes_stream),
                carry: Vec::new(),
                decoder: FrameDecoder::new(),
                router: EventRouter::new(),
                pending: VecDeque::new(),
                eof: false,
            },
            |mut state| async move {
                loop {
                    if let Some(event) = state.pending.pop_front() {
                        return Some((Ok(event), state));
                    }
                    if state.eof {
                        return None;
                    }

                    match state.bytes.next().await {
                        Some(Ok(chunk)) => {
                            state.carry.extend_from_slice(&chunk);
                            let text = drain_valid_utf8(&mut state.carry);
                            for frame in state.decoder.feed(&text) {
                                state.pending.extend(state.router.classify(&frame));
                            }
                        }
                        Some(Err(e)) => {
                            state.eof = true;
                            return Some((
                                Err(StreamError::Read {
                                    message: e.to_string(),
                                }),
                                state,
                            ));
                        }
                        None => {
                            // A carry left at EOF can only be a truncated
                            // multi-byte character; decode it lossily so the
                            // bytes before it are not lost.
                            if !state.carry.is_empty() {
                                let tail = String::from_utf8_lossy(&state.carry).into_owned();
                                state.carry.clear();
                                for frame in state.decoder.feed(&tail) {
                                    state.pending.extend(state.router.classify(&frame));
                                }
                            }
                            // Flush whatever the final chunk left unterminated.
                            if let Some(frame) = state.decoder.finish() {
                                state.pending.extend(state.router.classify(&frame));
                            }
                            state.eof = true;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }
}

struct PipelineState {
    bytes: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    carry: Vec<u8>,
    decoder: FrameDecoder,
    router: EventRouter,
    pending: VecDeque<TypedEvent>,
    eof: bool,
}

/// Take all decodable UTF-8 out of `buf`, leaving only a trailing partial
/// multi-byte sequence (if any) for the next chunk. Invalid sequences inside
/// the buffer are dropped and draining continues past them.
fn drain_valid_utf8(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(buf) {
            Ok(text) => {
                out.push_str(text);
                buf.clear();
                return out;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[..valid]));
                match err.error_len() {
                    // Bytes that can never complete a character.
                    Some(bad_len) => {
                        buf.drain(..valid + bad_len);
                    }
                    // Possibly the start of a character split across chunks.
                    None => {
                        buf.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_valid_utf8_complete() {
        let mut buf = "hello".as_bytes().to_vec();
        assert_eq!(drain_valid_utf8(&mut buf), "hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_valid_utf8_split_multibyte() {
        let full = "héllo".as_bytes();
        // Split in the middle of the two-byte 'é'.
        let mut buf = full[..2].to_vec();
        assert_eq!(drain_valid_utf8(&mut buf), "h");
        assert_eq!(buf.len(), 1);

        buf.extend_from_slice(&full[2..]);
        assert_eq!(drain_valid_utf8(&mut buf), "éllo");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_valid_utf8_invalid_byte_dropped() {
        // Everything around the bad byte comes out in the same call.
        let mut buf = vec![b'a', 0xFF, b'b'];
        assert_eq!(drain_valid_utf8(&mut buf), "ab");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_valid_utf8_multiple_invalid_runs() {
        let mut buf = vec![b'a', 0xFF, 0xFE, b'b', 0xFF, b'c'];
        assert_eq!(drain_valid_utf8(&mut buf), "abc");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_valid_utf8_invalid_then_partial_tail() {
        let e_acute = "é".as_bytes();
        let mut buf = vec![b'a', 0xFF, b'b', e_acute[0]];
        assert_eq!(drain_valid_utf8(&mut buf), "ab");
        // The split character stays carried for the next chunk.
        assert_eq!(buf, vec![e_acute[0]]);
        buf.push(e_acute[1]);
        assert_eq!(drain_valid_utf8(&mut buf), "é");
        assert!(buf.is_empty());
    }
}
