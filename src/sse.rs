//! Server-Sent Events (SSE) processing for streamed answers.
//!
//! The backend streams an answer as a sequence of frames separated by a blank
//! line.  Each frame's `data:` field carries one token; the literal `[DONE]`
//! (or an `end` event) marks the normal end of the answer and an `error` event
//! carries a failure message:
//!
//! ```text
//! data: Hello
//!
//! data:  world
//!
//! event: end
//! data: [DONE]
//! ```
//!
//! [`SseDecoder`] splits raw bytes into frames, [`process_sse`] turns a body
//! into [`StreamEvent`]s, and [`TokenStream`] wraps the result with the
//! delivery guarantees callers rely on: the stream ends with exactly one
//! `End` or one error, never both, and nothing is delivered after
//! [`CancelHandle::cancel`].

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::observability::{
    STREAM_BYTES, STREAM_CANCELLED, STREAM_DISCARDED_FRAMES, STREAM_ERRORS, STREAM_TOKENS,
};

/// Payload marking the normal end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event of an answer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental piece of the answer.
    Token(String),
    /// The answer is complete.
    End,
}

/// A raw SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if present.
    pub event: Option<String>,
    /// Value of the `data:` field(s), joined with newlines.
    pub data: Option<String>,
}

impl SseFrame {
    /// Interprets the frame as a stream event.
    ///
    /// Returns `None` for frames that carry nothing to deliver (keep-alives,
    /// events without data).
    pub fn into_event(self) -> Option<Result<StreamEvent>> {
        match (self.event.as_deref(), self.data) {
            (Some("error"), data) => Some(Err(Error::streaming(
                data.filter(|d| !d.is_empty())
                    .unwrap_or_else(|| "backend reported a stream error".to_string()),
                None,
            ))),
            (Some("end"), _) => Some(Ok(StreamEvent::End)),
            (_, Some(data)) if data == DONE_SENTINEL => Some(Ok(StreamEvent::End)),
            (_, Some(data)) if !data.is_empty() => Some(Ok(StreamEvent::Token(data))),
            _ => None,
        }
    }
}

/// Splits a byte stream into [`SseFrame`]s.
///
/// Bytes are buffered until a frame terminator (`\n\n` or `\r\n\r\n`) arrives,
/// and only complete frames are decoded as UTF-8, so a multi-byte character
/// split across two reads decodes correctly.  A partial frame left in the
/// buffer when the input ends is discarded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    _private: (),
}

impl SseDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for SseDecoder {
    type Item = SseFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>> {
        while let Some((end, terminator)) = find_frame_end(src) {
            let raw = src.split_to(end);
            src.advance(terminator);
            let text = std::str::from_utf8(&raw)?;
            if let Some(frame) = parse_frame(text) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            STREAM_DISCARDED_FRAMES.click();
            tracing::debug!(bytes = src.len(), "discarding unterminated trailing frame");
            src.clear();
        }
        Ok(None)
    }
}

/// Returns the offset of the first frame terminator and its length.
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buf, b"\n\n").map(|at| (at, 2));
    let crlf = find(buf, b"\r\n\r\n").map(|at| (at, 4));
    match (lf, crlf) {
        (Some(lf), Some(crlf)) => Some(if crlf.0 < lf.0 { crlf } else { lf }),
        (lf, crlf) => lf.or(crlf),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parses the fields of one frame.  Returns `None` if the frame is empty or
/// holds only comments.
///
/// The backend writes each token as `data: {token}` without escaping line
/// breaks, so a line with no known field name that follows a `data:` line
/// continues that data.  A frame made only of such lines is the tail of a
/// token that contained a blank line and is returned as data starting with
/// `\n\n`.  Breaks at the very end of a token, and runs of more than one
/// blank line, cannot be told apart from frame separators and are lost.
fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut orphan_lines: Vec<&str> = Vec::new();
    let mut has_field = false;
    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                has_field = true;
                frame.event = Some(value.to_string());
            }
            "data" => data_lines.push(value),
            "id" | "retry" => has_field = true,
            _ if !data_lines.is_empty() => data_lines.push(line),
            _ => orphan_lines.push(line),
        }
    }
    if !data_lines.is_empty() {
        frame.data = Some(data_lines.join("\n"));
    } else if !has_field && orphan_lines.iter().any(|line| !line.is_empty()) {
        frame.data = Some(format!("\n\n{}", orphan_lines.join("\n")));
    }
    if frame.event.is_none() && frame.data.is_none() {
        return None;
    }
    Some(frame)
}

struct SseState<S> {
    body: S,
    buffer: BytesMut,
    decoder: SseDecoder,
    eof: bool,
    done: bool,
}

/// Process a stream of bytes into a stream of answer events.
///
/// The returned stream yields tokens in order and then exactly one terminal
/// item: `Ok(StreamEvent::End)` for the sentinel, an `end` event, or a clean
/// close of the body; `Err(_)` for an `error` event, undecodable bytes, or a
/// failed read.  Nothing follows the terminal item.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = SseState {
        body: byte_stream,
        buffer: BytesMut::new(),
        decoder: SseDecoder::new(),
        eof: false,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            let decoded = if state.eof {
                state.decoder.decode_eof(&mut state.buffer)
            } else {
                state.decoder.decode(&mut state.buffer)
            };
            match decoded {
                Ok(Some(frame)) => {
                    if let Some(event) = frame.into_event() {
                        state.done = !matches!(event, Ok(StreamEvent::Token(_)));
                        return Some((event, state));
                    }
                    continue;
                }
                Ok(None) if state.eof => {
                    state.done = true;
                    return Some((Ok(StreamEvent::End), state));
                }
                Ok(None) => {}
                Err(err) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    state.buffer.extend_from_slice(&bytes);
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => state.eof = true,
            }
        }
    })
}

/// Cooperative cancellation signal for a [`TokenStream`].
///
/// Cloning yields a handle to the same signal.  Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Creates a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation.  Calling it again has no effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when cancellation is signalled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Returns a handle that is cancelled along with this one but can also
    /// be cancelled on its own.
    pub fn child(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.child_token(),
        }
    }
}

/// A fused, cancellable stream of answer events.
///
/// Once the stream yields `End` or an error, or once its [`CancelHandle`] is
/// cancelled, it yields `None` forever.  The underlying connection is dropped
/// as soon as cancellation is observed.  If the source ends without a
/// terminal item, a single `End` is synthesized.
pub struct TokenStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>,
    cancel: CancelHandle,
    finished: bool,
}

impl TokenStream {
    /// Wraps an event stream.
    pub fn new<S>(events: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent>> + Send + 'static,
    {
        Self {
            inner: Box::pin(events),
            cancel: CancelHandle::new(),
            finished: false,
        }
    }

    /// Wraps a raw SSE body.
    pub fn from_bytes<S>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
    {
        Self::new(process_sse(body))
    }

    /// Also stops this stream when `parent` is cancelled.
    pub fn with_parent(mut self, parent: &CancelHandle) -> Self {
        self.cancel = parent.child();
        self
    }

    /// Returns a handle that cancels this stream.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels this stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the stream can yield nothing more.
    pub fn is_finished(&self) -> bool {
        self.finished || self.cancel.is_cancelled()
    }

    /// Waits for the next event, returning `None` immediately on cancellation
    /// even while the connection is idle.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        if self.is_finished() {
            self.release();
            return None;
        }
        let cancel = self.cancel.clone();
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            event = self.next() => Some(event),
        };
        match event {
            Some(event) => event,
            None => {
                self.release();
                None
            }
        }
    }

    fn release(&mut self) {
        if !self.finished {
            self.finished = true;
            if self.cancel.is_cancelled() {
                STREAM_CANCELLED.click();
            }
            self.inner = Box::pin(stream::empty());
        }
    }
}

impl Stream for TokenStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_finished() {
            self.release();
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(StreamEvent::Token(token)))) => {
                STREAM_TOKENS.click();
                Poll::Ready(Some(Ok(StreamEvent::Token(token))))
            }
            Poll::Ready(Some(Ok(StreamEvent::End))) | Poll::Ready(None) => {
                self.release();
                Poll::Ready(Some(Ok(StreamEvent::End)))
            }
            Poll::Ready(Some(Err(err))) => {
                STREAM_ERRORS.click();
                self.release();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Receives the events of a stream driven by [`drive`].
pub trait StreamObserver: Send {
    /// Called once per token, in order.
    fn on_token(&mut self, token: &str);

    /// Called once when the stream completes normally.
    fn on_end(&mut self);

    /// Called once when the stream fails.
    fn on_error(&mut self, error: &Error);
}

/// How a driven stream finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `on_end` was called.
    Completed,
    /// The stream was cancelled; neither `on_end` nor `on_error` was called.
    Cancelled,
}

/// Reads `stream` to completion, forwarding events to `observer`.
///
/// Exactly one of `on_end` or `on_error` fires unless the stream is
/// cancelled, in which case neither does and no callback of any kind
/// happens after cancellation is observed.  Errors are returned after being
/// passed to `on_error`.
pub async fn drive(
    stream: &mut TokenStream,
    observer: &mut dyn StreamObserver,
) -> Result<StreamOutcome> {
    loop {
        match stream.next_event().await {
            Some(Ok(StreamEvent::Token(token))) => {
                if stream.cancel.is_cancelled() {
                    stream.release();
                    return Ok(StreamOutcome::Cancelled);
                }
                observer.on_token(&token);
            }
            Some(Ok(StreamEvent::End)) => {
                if stream.cancel.is_cancelled() {
                    return Ok(StreamOutcome::Cancelled);
                }
                observer.on_end();
                return Ok(StreamOutcome::Completed);
            }
            Some(Err(err)) => {
                if stream.cancel.is_cancelled() {
                    return Ok(StreamOutcome::Cancelled);
                }
                observer.on_error(&err);
                return Err(err);
            }
            None => return Ok(StreamOutcome::Cancelled),
        }
    }
}

/// A stream being driven on a background task.
pub struct StreamTask {
    cancel: CancelHandle,
    join: JoinHandle<Result<StreamOutcome>>,
}

impl StreamTask {
    /// Cancels the stream.  No observer callback fires after this returns
    /// unless one was already executing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that cancels the stream.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Waits for the stream to finish.
    pub async fn join(self) -> Result<StreamOutcome> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(err) => Err(Error::streaming(
                format!("stream task failed: {err}"),
                Some(Box::new(err)),
            )),
        }
    }
}

/// Drives `stream` on a new task, delivering events to `observer`.
pub fn spawn<O>(mut stream: TokenStream, mut observer: O) -> StreamTask
where
    O: StreamObserver + 'static,
{
    let cancel = stream.cancel_handle();
    let join = tokio::spawn(async move { drive(&mut stream, &mut observer).await });
    StreamTask { cancel, join }
}
