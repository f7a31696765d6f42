//! Response body module
//!
//! `FileBody` is the hyper body handed back to the listener. It is either
//! empty, a complete in-memory value, or the receiving half of a bounded
//! channel fed by a push-based [`BodySink`] with backpressure.

use crate::error::ServeError;
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Chunks buffered between a producer and the connection before backpressure
pub const CHANNEL_CAPACITY: usize = 4;

/// Invoked once the body has been fully handed to the connection, with the
/// response status and the number of body bytes delivered
pub type Completion = Box<dyn FnOnce(StatusCode, u64) + Send>;

/// The consumer side of a sink went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("response body receiver dropped")]
pub struct SinkClosed;

/// Push-based output with backpressure signaling
pub trait BodySink: Send {
    /// Push a chunk. `Ok(false)` means the chunk was accepted but the producer
    /// must wait for [`BodySink::drained`] before writing again.
    fn write(&mut self, chunk: Bytes) -> Result<bool, SinkClosed>;

    /// Resolves once the sink can accept more data
    fn drained(&mut self) -> impl Future<Output = Result<(), SinkClosed>> + Send;

    /// Resolves when the consumer has gone away
    fn closed(&self) -> impl Future<Output = ()> + Send;

    /// Whether the consumer is already gone
    fn is_closed(&self) -> bool;

    /// Signal end of data; idempotent
    fn end(&mut self);

    fn is_ended(&self) -> bool;
}

/// Sink backed by a bounded tokio channel
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
    pending: Option<Bytes>,
}

impl ChannelSink {
    /// Sink plus the raw receiving half, for custom consumers
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                pending: None,
            },
            rx,
        )
    }
}

impl BodySink for ChannelSink {
    fn write(&mut self, chunk: Bytes) -> Result<bool, SinkClosed> {
        let Some(tx) = &self.tx else {
            return Err(SinkClosed);
        };
        debug_assert!(self.pending.is_none(), "write before drained");

        match tx.try_send(chunk) {
            Ok(()) => Ok(tx.capacity() > 0),
            Err(mpsc::error::TrySendError::Full(chunk)) => {
                self.pending = Some(chunk);
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkClosed),
        }
    }

    async fn drained(&mut self) -> Result<(), SinkClosed> {
        let tx = self.tx.as_ref().ok_or(SinkClosed)?;
        if let Some(chunk) = self.pending.take() {
            tx.send(chunk).await.map_err(|_| SinkClosed)?;
        }
        // A granted permit means at least one free slot
        drop(tx.reserve().await.map_err(|_| SinkClosed)?);
        Ok(())
    }

    async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    fn end(&mut self) {
        self.pending = None;
        self.tx = None;
    }

    fn is_ended(&self) -> bool {
        self.tx.is_none()
    }
}

/// Create a streaming body of `len` bytes and the sink feeding it
pub fn channel(len: u64) -> (ChannelSink, FileBody) {
    let (sink, rx) = ChannelSink::with_capacity(CHANNEL_CAPACITY);
    (sink, FileBody::new(Kind::Stream { rx, remaining: len }))
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Stream {
        rx: mpsc::Receiver<Bytes>,
        remaining: u64,
    },
}

/// Response body for file responses
pub struct FileBody {
    kind: Kind,
    delivered: u64,
    status: StatusCode,
    completion: Option<Completion>,
}

impl FileBody {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            delivered: 0,
            status: StatusCode::OK,
            completion: None,
        }
    }

    /// Body without any data (HEAD, 304, 412, 416)
    pub fn empty() -> Self {
        Self::new(Kind::Empty)
    }

    /// Complete in-memory body
    pub fn full(data: impl Into<Bytes>) -> Self {
        Self::new(Kind::Full(Some(data.into())))
    }

    /// Attach the completion callback, fired with `status` once every byte
    /// has been delivered
    pub fn on_complete(&mut self, status: StatusCode, completion: Completion) {
        self.status = status;
        self.completion = Some(completion);
    }

    fn finished(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Full(data) => data.is_none(),
            Kind::Stream { remaining, .. } => *remaining == 0,
        }
    }
}

impl Body for FileBody {
    type Data = Bytes;
    type Error = ServeError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        let (poll, truncated) = match &mut this.kind {
            Kind::Empty => (Poll::Ready(None), false),
            Kind::Full(data) => {
                let frame = data.take().map(|d| {
                    this.delivered += d.len() as u64;
                    Ok(Frame::data(d))
                });
                (Poll::Ready(frame), false)
            }
            Kind::Stream { rx, remaining } => match rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    let n = chunk.len() as u64;
                    *remaining = remaining.saturating_sub(n);
                    this.delivered += n;
                    (Poll::Ready(Some(Ok(Frame::data(chunk)))), false)
                }
                Poll::Ready(None) if *remaining == 0 => (Poll::Ready(None), false),
                Poll::Ready(None) => {
                    let err = ServeError::Transfer(format!(
                        "body ended with {remaining} bytes outstanding"
                    ));
                    (Poll::Ready(Some(Err(err))), true)
                }
                Poll::Pending => (Poll::Pending, false),
            },
        };

        if truncated {
            // Report the truncation once, then behave as an ended stream
            this.kind = Kind::Full(None);
            this.completion = None;
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.finished()
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Full(data) => SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64)),
            Kind::Stream { remaining, .. } => SizeHint::with_exact(*remaining),
        }
    }
}

impl Drop for FileBody {
    fn drop(&mut self) {
        if !self.finished() {
            return;
        }
        if let Some(completion) = self.completion.take() {
            completion(self.status, self.delivered);
        }
    }
}
