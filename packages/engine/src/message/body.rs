// packages/engine/src/message/body.rs
//! Message bodies
//!
//! A [`Body`] is empty, a single buffer, or a byte stream. Stream bodies are
//! replayable: every clone reads the full stream from the start, and the
//! underlying source is polled at most once per chunk no matter how many
//! readers exist. This is what lets an interceptor hand a copy of a response
//! to observers while the caller consumes the original.

use crate::utils::errors::{InterceptError, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Item produced by a body stream
pub type Chunk = Result<Bytes>;

/// Request or response body
#[derive(Clone, Default)]
pub struct Body {
    kind: BodyKind,
}

#[derive(Clone, Default)]
enum BodyKind {
    #[default]
    Empty,
    Full(Bytes),
    Stream(Arc<Mutex<SharedStream>>),
}

struct SharedStream {
    source: Option<BoxStream<'static, Chunk>>,
    chunks: Vec<Chunk>,
    done: bool,
    waiters: Vec<Waker>,
}

impl SharedStream {
    fn wake_all(&mut self) {
        for waker in self.waiters.drain(..) {
            waker.wake();
        }
    }
}

impl Body {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Body backed by a stream of chunks
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Chunk> + Send + 'static,
    {
        Self {
            kind: BodyKind::Stream(Arc::new(Mutex::new(SharedStream {
                source: Some(stream.boxed()),
                chunks: Vec::new(),
                done: false,
                waiters: Vec::new(),
            }))),
        }
    }

    /// Stream body yielding the given chunks in order
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Chunk> = chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::from_stream(stream::iter(chunks))
    }

    /// True for bodies that are known to carry no bytes
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            BodyKind::Empty => true,
            BodyKind::Full(bytes) => bytes.is_empty(),
            BodyKind::Stream(_) => false,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, BodyKind::Stream(_))
    }

    /// Exact length when known without reading
    pub fn size_hint(&self) -> Option<u64> {
        match &self.kind {
            BodyKind::Empty => Some(0),
            BodyKind::Full(bytes) => Some(bytes.len() as u64),
            BodyKind::Stream(_) => None,
        }
    }

    /// Read the body chunk by chunk
    pub fn into_stream(self) -> BoxStream<'static, Chunk> {
        match self.kind {
            BodyKind::Empty => stream::empty().boxed(),
            BodyKind::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            BodyKind::Stream(shared) => BodyReader { shared, cursor: 0 }.boxed(),
        }
    }

    /// Read the whole body
    pub async fn bytes(self) -> Result<Bytes> {
        match self.kind {
            BodyKind::Empty => Ok(Bytes::new()),
            BodyKind::Full(bytes) => Ok(bytes),
            kind @ BodyKind::Stream(_) => {
                let mut stream = Self { kind }.into_stream();
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// Read the whole body as UTF-8 text (invalid sequences are replaced)
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| InterceptError::Body(e.to_string()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BodyKind::Empty => f.write_str("Body::Empty"),
            BodyKind::Full(bytes) => write!(f, "Body::Full({} bytes)", bytes.len()),
            BodyKind::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: BodyKind::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}

/// One reader over a shared stream body
struct BodyReader {
    shared: Arc<Mutex<SharedStream>>,
    cursor: usize,
}

impl Stream for BodyReader {
    type Item = Chunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
        let this = &mut *self;
        let mut shared = this.shared.lock();

        if let Some(chunk) = shared.chunks.get(this.cursor) {
            this.cursor += 1;
            return Poll::Ready(Some(chunk.clone()));
        }
        if shared.done {
            return Poll::Ready(None);
        }

        let polled = match shared.source.as_mut() {
            Some(source) => source.poll_next_unpin(cx),
            None => Poll::Ready(None),
        };

        match polled {
            Poll::Ready(Some(chunk)) => {
                // A failed read ends the stream for every reader
                if chunk.is_err() {
                    shared.done = true;
                    shared.source = None;
                }
                shared.chunks.push(chunk.clone());
                this.cursor += 1;
                shared.wake_all();
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                shared.done = true;
                shared.source = None;
                shared.wake_all();
                Poll::Ready(None)
            }
            Poll::Pending => {
                if !shared.waiters.iter().any(|w| w.will_wake(cx.waker())) {
                    shared.waiters.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        // The source may have registered only this reader's waker
        self.shared.lock().wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    #[tokio::test]
    async fn test_full_body() {
        let body = Body::from("hello");
        assert!(!body.is_empty());
        assert_eq!(body.size_hint(), Some(5));
        assert_eq!(body.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_empty_body() {
        let body = Body::empty();
        assert!(body.is_empty());
        assert!(body.clone().into_stream().next().await.is_none());
        assert!(body.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_clones_replay() {
        let body = Body::from_chunks(["a", "b", "c"]);
        let copy = body.clone();

        assert_eq!(body.text().await.unwrap(), "abc");
        assert_eq!(copy.clone().text().await.unwrap(), "abc");

        let chunks: Vec<Bytes> = copy
            .into_stream()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_every_chunk() {
        let (tx, rx) = mpsc::unbounded::<Chunk>();
        let body = Body::from_stream(rx);

        let first = tokio::spawn(body.clone().text());
        let second = tokio::spawn(body.text());

        for part in ["x", "y", "z"] {
            tx.unbounded_send(Ok(Bytes::from_static(part.as_bytes()))).unwrap();
            tokio::task::yield_now().await;
        }
        drop(tx);

        assert_eq!(first.await.unwrap().unwrap(), "xyz");
        assert_eq!(second.await.unwrap().unwrap(), "xyz");
    }

    #[tokio::test]
    async fn test_stream_error_is_terminal() {
        let body = Body::from_stream(stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(InterceptError::Body("connection reset".into())),
            Ok(Bytes::from_static(b"never")),
        ]));

        let err = body.clone().bytes().await.unwrap_err();
        assert_eq!(err, InterceptError::Body("connection reset".into()));

        let items: Vec<Chunk> = body.into_stream().collect().await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_json() {
        let body = Body::from(r#"{"id": 7}"#);
        let value: serde_json::Value = body.json().await.unwrap();
        assert_eq!(value["id"], 7);
    }
}
