//! Single-consumption response bodies.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;

use crate::Result;

/// Boxed byte stream backing a streaming [`Body`].
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pin_project! {
    /// A response body, readable exactly once.
    ///
    /// Either a fully buffered chunk (replays, tests) or a live stream from
    /// a transport. Consuming methods take `self`, so a body cannot be read
    /// twice.
    #[project = BodyProj]
    pub enum Body {
        Full { chunk: Option<Bytes> },
        Streaming { #[pin] stream: BodyStream },
    }
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Body::Full { chunk: None }
    }

    /// A body over already-buffered bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Body::Full {
            chunk: (!bytes.is_empty()).then_some(bytes),
        }
    }

    /// A body over a live byte stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Body::Streaming {
            stream: Box::pin(stream),
        }
    }

    /// Drain the body into a single buffer.
    ///
    /// Stops at the first read error.
    pub async fn collect(self) -> Result<Bytes> {
        if let Body::Full { chunk } = self {
            return Ok(chunk.unwrap_or_default());
        }
        let mut stream = self;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full { chunk } => f
                .debug_struct("Body::Full")
                .field("len", &chunk.as_ref().map_or(0, Bytes::len))
                .finish(),
            Body::Streaming { .. } => f.write_str("Body::Streaming"),
        }
    }
}

impl Stream for Body {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.project() {
            BodyProj::Full { chunk } => Poll::Ready(chunk.take().map(Ok)),
            BodyProj::Streaming { stream } => stream.poll_next(cx),
        }
    }
}
