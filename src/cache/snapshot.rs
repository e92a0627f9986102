//! Replayable captures of streamed responses.

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode};

use crate::pipeline::{Body, Response};
use crate::{MuninnError, Result};

/// Immutable copy of a response: status, headers and the complete body.
///
/// Every [`replay`](Self::replay) hands out a fresh [`Body`] over the same
/// bytes. `Bytes` clones share storage but not read position, so replays
/// never interfere with each other.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseSnapshot {
    /// Drain `response` and capture it.
    ///
    /// Always returns a response the caller can read exactly once with the
    /// bytes the transport produced. If the body fails mid-stream, that
    /// response replays what was read and then yields the same error, and
    /// the snapshot result is `Err`.
    pub async fn capture(response: Response) -> (Response, Result<ResponseSnapshot>) {
        let Response {
            status,
            headers,
            mut body,
        } = response;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(e) => {
                    let error = MuninnError::Stream(format!("incomplete body: {e}"));
                    let read = buf.freeze();
                    let replay = Body::from_stream(futures_util::stream::iter([Ok(read), Err(e)]));
                    return (Response::new(status, headers, replay), Err(error));
                }
            }
        }

        let snapshot = ResponseSnapshot {
            status,
            headers,
            body: buf.freeze(),
        };
        (snapshot.replay(), Ok(snapshot))
    }

    /// A fresh response over the captured bytes.
    pub fn replay(&self) -> Response {
        Response::new(
            self.status,
            self.headers.clone(),
            Body::from_bytes(self.body.clone()),
        )
    }
}
