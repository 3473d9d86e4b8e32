//! Server-Sent Events (SSE) stream processing.
//!
//! The session API streams replies as frames separated by a blank line:
//! ```text
//! event: token
//! data: {"content": "It sounds"}
//!
//! event: token
//! data: {"content": " hard."}
//!
//! event: done
//! data: {"message_index": 1}
//! ```
//!
//! [`FrameReassembler`] turns raw body chunks into frame texts,
//! [`decode_frame`] turns one frame into a [`StreamEvent`], and
//! [`event_stream`] combines both into a lazy stream of events.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::trace;

use crate::client::ClientError;
use crate::model::{EventKind, StreamEvent};

/// Incremental splitter of a chunked SSE body into complete frames.
///
/// Holds the undecoded tail of a split UTF-8 character, a trailing `\r` that
/// may begin a CRLF, and all text after the last frame boundary.
///
/// # Example
/// ```
/// use empathy_practice::sse::FrameReassembler;
///
/// let mut frames = FrameReassembler::new();
/// assert!(frames.push(b"event: token\r\ndata: {\"content\":\"he").is_empty());
/// assert_eq!(
///     frames.push(b"llo\"}\r\n\r\n"),
///     vec!["event: token\ndata: {\"content\":\"hello\"}".to_string()]
/// );
/// assert_eq!(frames.finish(), None);
/// ```
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: String,
    utf8_tail: Vec<u8>,
    pending_cr: bool,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode_utf8(chunk);
        self.append_normalized(&text);
        self.drain_frames()
    }

    /// Flush at end of data.
    ///
    /// Returns the unterminated remainder as a final frame when it holds
    /// anything besides whitespace.
    pub fn finish(&mut self) -> Option<String> {
        if !self.utf8_tail.is_empty() {
            let tail = std::mem::take(&mut self.utf8_tail);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push('\r');
        }

        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.utf8_tail);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence; wait for the next chunk.
                            self.utf8_tail = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    fn append_normalized(&mut self, text: &str) {
        let mut joined = String::with_capacity(text.len() + 1);
        if std::mem::take(&mut self.pending_cr) {
            joined.push('\r');
        }
        joined.push_str(text);

        if joined.ends_with('\r') {
            joined.pop();
            self.pending_cr = true;
        }

        self.buffer.push_str(&joined.replace("\r\n", "\n"));
    }

    fn drain_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            if !frame.trim().is_empty() {
                frames.push(frame);
            }
        }
        frames
    }
}

/// Decode one frame into an event.
///
/// The last `event: ` line sets the kind (default `message`) and the last
/// `data: ` line the payload. Frames without data yield nothing.
///
/// # Example
/// ```
/// use empathy_practice::model::EventKind;
/// use empathy_practice::sse::decode_frame;
///
/// let event = decode_frame("data: not-json").unwrap();
/// assert_eq!(event.kind, EventKind::Message);
/// assert_eq!(event.raw(), Some("not-json"));
///
/// assert!(decode_frame("event: done").is_none());
/// ```
pub fn decode_frame(frame: &str) -> Option<StreamEvent> {
    let mut tag = None;
    let mut data = None;

    for line in frame.split('\n') {
        if let Some(value) = line.strip_prefix("event: ") {
            tag = Some(value);
        } else if let Some(value) = line.strip_prefix("data: ") {
            data = Some(value);
        }
    }

    let data = data.filter(|data| !data.is_empty())?;
    let kind = tag.map(EventKind::from).unwrap_or(EventKind::Message);
    Some(StreamEvent::new(kind, decode_payload(data)))
}

fn decode_payload(data: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(payload)) => payload,
        _ => {
            let mut payload = Map::new();
            payload.insert("raw".to_string(), Value::String(data.to_string()));
            payload
        }
    }
}

struct EventStreamState<S> {
    body: Pin<Box<S>>,
    frames: FrameReassembler,
    ready: VecDeque<StreamEvent>,
    ended: bool,
}

/// Turn a chunked body into a lazy stream of events.
///
/// Nothing is read from `body` until the stream is polled, and dropping the
/// stream drops the body. A transport error is yielded once and ends the
/// stream.
pub fn event_stream<S, B, E>(body: S) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    let state = EventStreamState {
        body: Box::pin(body),
        frames: FrameReassembler::new(),
        ready: VecDeque::new(),
        ended: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                trace!(kind = %event.kind, "sse event");
                return Some((Ok(event), state));
            }

            if state.ended {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.frames.push(chunk.as_ref());
                    state.ready.extend(frames.iter().filter_map(|frame| decode_frame(frame)));
                }
                Some(Err(e)) => {
                    state.ended = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.ended = true;
                    if let Some(frame) = state.frames.finish() {
                        trace!("flushing unterminated trailing frame");
                        state.ready.extend(decode_frame(&frame));
                    }
                }
            }
        }
    })
}

/// Extension trait for `reqwest::Response` to read its body as SSE events.
///
/// # Example
/// ```ignore
/// use empathy_practice::sse::SSEResponseExt;
///
/// let response = http.post(url).send().await?;
/// let mut events = Box::pin(response.sse_events());
/// while let Some(event) = events.next().await {
///     println!("{:?}", event?);
/// }
/// ```
pub trait SSEResponseExt {
    /// Convert the response body into a stream of decoded events.
    fn sse_events(self) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send;
}

impl SSEResponseExt for reqwest::Response {
    fn sse_events(self) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send {
        event_stream(self.bytes_stream())
    }
}

/// Chunks of an in-memory body, for feeding [`event_stream`] without a socket.
pub fn chunks_of<I>(chunks: I) -> impl Stream<Item = Result<Bytes, ClientError>> + Send
where
    I: IntoIterator,
    I::Item: Into<Bytes>,
    I::IntoIter: Send,
{
    stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<Bytes, ClientError>(chunk.into())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collect(chunks: Vec<Vec<u8>>) -> Vec<StreamEvent> {
        event_stream(chunks_of(chunks))
            .map(|event| event.unwrap())
            .collect()
            .await
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    const TRANSCRIPT: &str = "event: token\ndata: {\"content\":\"听起来\"}\n\n\
        event: token\ndata: {\"content\":\" hard\"}\n\n\
        : keepalive\n\n\
        data: plain text\n\n\
        event: done\ndata: {\"message_index\":1}";

    #[test]
    fn test_frame_split_across_chunks() {
        let mut frames = FrameReassembler::new();
        assert!(frames
            .push(b"event: token\ndata: {\"content\":\"he")
            .is_empty());
        let completed = frames.push(b"llo\"}\n\n");
        assert_eq!(completed.len(), 1);

        let event = decode_frame(&completed[0]).unwrap();
        assert_eq!(event.kind, EventKind::Token);
        assert_eq!(event.content(), Some("hello"));
    }

    #[test]
    fn test_several_frames_in_one_chunk() {
        let mut frames = FrameReassembler::new();
        let completed = frames.push(b"data: {}\n\n\n\ndata: {}\n\nevent: do");
        assert_eq!(completed, vec!["data: {}".to_string(), "data: {}".to_string()]);
        assert_eq!(frames.finish(), Some("event: do".to_string()));
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let mut frames = FrameReassembler::new();
        assert!(frames.push(b"data: {}\r").is_empty());
        assert!(frames.push(b"\n\r").is_empty());
        assert_eq!(frames.push(b"\n"), vec!["data: {}".to_string()]);
    }

    #[test]
    fn test_lone_cr_is_kept() {
        let mut frames = FrameReassembler::new();
        assert!(frames.push(b"data: a\rb").is_empty());
        assert_eq!(frames.finish(), Some("data: a\rb".to_string()));
    }

    #[test]
    fn test_utf8_split_between_chunks() {
        let bytes = "data: {\"content\":\"你好\"}\n\n".as_bytes();
        // Split inside the first three-byte character.
        let split = "data: {\"content\":\"".len() + 1;
        let mut frames = FrameReassembler::new();
        assert!(frames.push(&bytes[..split]).is_empty());
        let completed = frames.push(&bytes[split..]);
        assert_eq!(decode_frame(&completed[0]).unwrap().content(), Some("你好"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut frames = FrameReassembler::new();
        let completed = frames.push(b"data: a\xffb\n\n");
        assert_eq!(completed, vec!["data: a\u{fffd}b".to_string()]);
    }

    #[test]
    fn test_whitespace_only_frames_skipped() {
        let mut frames = FrameReassembler::new();
        assert!(frames.push(b"\n\n  \n\n\t\n\n").is_empty());
        assert_eq!(frames.finish(), None);
    }

    #[test]
    fn test_decode_frame_defaults_to_message() {
        let event = decode_frame("data: {\"a\": 1}").unwrap();
        assert_eq!(event.kind, EventKind::Message);
        assert_eq!(event.payload, payload(json!({"a": 1})));
    }

    #[test]
    fn test_decode_frame_malformed_json() {
        let event = decode_frame("data: not-json").unwrap();
        assert_eq!(event.kind, EventKind::Message);
        assert_eq!(event.payload, payload(json!({"raw": "not-json"})));
    }

    #[test]
    fn test_decode_frame_non_object_json() {
        let event = decode_frame("event: token\ndata: 42").unwrap();
        assert_eq!(event.payload, payload(json!({"raw": "42"})));
        let event = decode_frame("data: null").unwrap();
        assert_eq!(event.payload, payload(json!({"raw": "null"})));
    }

    #[test]
    fn test_decode_frame_last_line_wins() {
        let event =
            decode_frame("event: token\nevent: error\ndata: {\"detail\":\"a\"}\ndata: {\"detail\":\"b\"}")
                .unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.detail(), Some("b"));
    }

    #[test]
    fn test_decode_frame_without_data() {
        assert!(decode_frame("event: done").is_none());
        assert!(decode_frame("event: token\ndata: ").is_none());
        assert!(decode_frame("id: 4\nretry: 100").is_none());
    }

    #[test]
    fn test_decode_frame_unknown_kind() {
        let event = decode_frame("event: annotation\ndata: {}").unwrap();
        assert_eq!(event.kind, EventKind::Other("annotation".to_string()));
    }

    #[tokio::test]
    async fn test_trailing_frame_without_terminator() {
        let events = collect(vec![b"event: done\ndata: {}".to_vec()]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Done);
    }

    #[tokio::test]
    async fn test_crlf_matches_lf() {
        let lf = collect(vec![TRANSCRIPT.as_bytes().to_vec()]).await;
        let crlf = collect(vec![TRANSCRIPT.replace('\n', "\r\n").into_bytes()]).await;
        assert_eq!(lf, crlf);
        assert_eq!(lf.len(), 4);
    }

    #[tokio::test]
    async fn test_rechunking_is_idempotent() {
        let whole = collect(vec![TRANSCRIPT.as_bytes().to_vec()]).await;
        let bytewise = collect(TRANSCRIPT.bytes().map(|b| vec![b]).collect()).await;
        let crlf = TRANSCRIPT.replace('\n', "\r\n");
        let crlf_bytewise = collect(crlf.bytes().map(|b| vec![b]).collect()).await;

        assert_eq!(whole, bytewise);
        assert_eq!(whole, crlf_bytewise);
        assert_eq!(
            whole.iter().map(|e| e.kind.clone()).collect::<Vec<_>>(),
            vec![
                EventKind::Token,
                EventKind::Token,
                EventKind::Message,
                EventKind::Done
            ]
        );
        assert_eq!(whole[0].content(), Some("听起来"));
        assert_eq!(whole[2].raw(), Some("plain text"));
        assert_eq!(whole[3].message_index(), Some(1));
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"event: token\ndata: {\"content\":\"a\"}\n\n")),
            Err(ClientError::Stream("connection reset".to_string())),
            Ok(Bytes::from_static(b"event: token\ndata: {\"content\":\"b\"}\n\n")),
        ]);
        let results: Vec<_> = event_stream(body).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().content(), Some("a"));
        assert!(matches!(results[1], Err(ClientError::Stream(_))));
    }
}
