//! # Stream Abstraction
//!
//! [`ChunkStream`] is the single streaming primitive of the gateway core. It is
//! pull-based and single-consumer: every producer (SSE/binary decoders,
//! protocol converters, persistence decorators) wraps another `ChunkStream`
//! and only does work when its consumer asks for the next element, so
//! backpressure is implicit.
//!
//! `next()` folds the classic Next/Current/Err triple into one return value:
//!
//! | Return | Meaning |
//! |--------|---------|
//! | `Some(Ok(item))` | advanced; `item` is the current element |
//! | `Some(Err(e))` | terminal error; subsequent calls return `None` |
//! | `None` | clean exhaustion |
//!
//! `close()` releases the underlying resources and must be idempotent.

mod convert;

pub use convert::{ConvertStream, Converter};

use crate::{BoxStream, Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

/// Pull-based lazy sequence.
#[async_trait]
pub trait ChunkStream<T>: Send
where
    T: Send,
{
    /// Advance the stream.
    async fn next(&mut self) -> Option<Result<T>>;

    /// Release resources. Calling it more than once is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Boxed stream used at every module boundary.
pub type BoxChunkStream<T> = Box<dyn ChunkStream<T>>;

/// Stream over an in-memory list.
pub struct VecStream<T> {
    items: VecDeque<Result<T>>,
}

impl<T> VecStream<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter().map(Ok).collect(),
        }
    }

    /// Items followed by a terminal error.
    pub fn with_error(items: Vec<T>, error: Error) -> Self {
        let mut items: VecDeque<Result<T>> = items.into_iter().map(Ok).collect();
        items.push_back(Err(error));
        Self { items }
    }
}

#[async_trait]
impl<T: Send> ChunkStream<T> for VecStream<T> {
    async fn next(&mut self) -> Option<Result<T>> {
        let item = self.items.pop_front()?;
        if item.is_err() {
            self.items.clear();
        }
        Some(item)
    }

    async fn close(&mut self) -> Result<()> {
        self.items.clear();
        Ok(())
    }
}

/// Adapter from a `futures` byte stream (e.g. `reqwest::Response::bytes_stream`).
pub struct ByteStream {
    inner: Option<BoxStream<'static, bytes::Bytes>>,
}

impl ByteStream {
    pub fn new(inner: BoxStream<'static, bytes::Bytes>) -> Self {
        Self { inner: Some(inner) }
    }
}

#[async_trait]
impl ChunkStream<bytes::Bytes> for ByteStream {
    async fn next(&mut self) -> Option<Result<bytes::Bytes>> {
        let inner = self.inner.as_mut()?;
        match inner.next().await {
            Some(Ok(bytes)) => Some(Ok(bytes)),
            Some(Err(e)) => {
                self.inner = None;
                Some(Err(e))
            }
            None => {
                self.inner = None;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the body stream releases the connection.
        self.inner = None;
        Ok(())
    }
}

/// Ends the wrapped stream with [`Error::Cancelled`] once the token fires.
pub struct CancellableStream<T> {
    inner: BoxChunkStream<T>,
    token: CancellationToken,
    done: bool,
}

impl<T> CancellableStream<T> {
    pub fn new(inner: BoxChunkStream<T>, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            done: false,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> ChunkStream<T> for CancellableStream<T> {
    async fn next(&mut self) -> Option<Result<T>> {
        if self.done {
            return None;
        }
        if self.token.is_cancelled() {
            self.done = true;
            return Some(Err(Error::Cancelled));
        }
        let item = tokio::select! {
            biased;
            _ = self.token.cancelled() => Some(Err(Error::Cancelled)),
            item = self.inner.next() => item,
        };
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }

    async fn close(&mut self) -> Result<()> {
        self.done = true;
        self.inner.close().await
    }
}

/// Drain a stream to completion, closing it afterwards.
///
/// The first error aborts collection; the stream is still closed.
pub async fn collect<T: Send>(mut stream: BoxChunkStream<T>) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(item) => items.push(item),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    stream.close().await?;
    match failure {
        Some(e) => Err(e),
        None => Ok(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vec_stream_stops_after_error() {
        let mut stream = VecStream::with_error(vec![1, 2], Error::Timeout);
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        assert!(matches!(stream.next().await, Some(Err(Error::Timeout))));
        assert!(stream.next().await.is_none());
        stream.close().await.unwrap();
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_ends_stream() {
        let token = CancellationToken::new();
        let inner: BoxChunkStream<u8> = Box::new(VecStream::new(vec![1, 2, 3]));
        let mut stream = CancellableStream::new(inner, token.clone());
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        token.cancel();
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn collect_surfaces_error() {
        let stream: BoxChunkStream<u8> =
            Box::new(VecStream::with_error(vec![1], Error::Cancelled));
        assert!(matches!(collect(stream).await, Err(Error::Cancelled)));
    }
}
