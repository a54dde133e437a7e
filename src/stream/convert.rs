//! Stateful one-to-many stream conversion.

use super::{BoxChunkStream, ChunkStream};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Converts one upstream element into zero or more downstream elements.
///
/// Implementations hold whatever state the target protocol needs (open
/// blocks, accumulated tool calls, ...). `finish` runs once after the
/// upstream is exhausted cleanly and may emit trailing elements.
pub trait Converter<I, O>: Send {
    fn convert(&mut self, item: I) -> Result<Vec<O>>;

    fn finish(&mut self) -> Result<Vec<O>> {
        Ok(Vec::new())
    }
}

impl<I, O, F> Converter<I, O> for F
where
    F: FnMut(I) -> Result<Vec<O>> + Send,
{
    fn convert(&mut self, item: I) -> Result<Vec<O>> {
        self(item)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Done,
}

/// Pull iterator driving a [`Converter`]: the output queue is refilled from
/// exactly one upstream element whenever it runs dry.
pub struct ConvertStream<I, O, C> {
    inner: BoxChunkStream<I>,
    converter: C,
    queue: VecDeque<O>,
    phase: Phase,
}

impl<I, O, C> ConvertStream<I, O, C>
where
    I: Send + 'static,
    O: Send + 'static,
    C: Converter<I, O> + 'static,
{
    pub fn new(inner: BoxChunkStream<I>, converter: C) -> Self {
        Self {
            inner,
            converter,
            queue: VecDeque::new(),
            phase: Phase::Running,
        }
    }

    pub fn boxed(inner: BoxChunkStream<I>, converter: C) -> BoxChunkStream<O> {
        Box::new(Self::new(inner, converter))
    }
}

#[async_trait]
impl<I, O, C> ChunkStream<O> for ConvertStream<I, O, C>
where
    I: Send + 'static,
    O: Send + 'static,
    C: Converter<I, O> + 'static,
{
    async fn next(&mut self) -> Option<Result<O>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(Ok(item));
            }
            match self.phase {
                Phase::Done => return None,
                Phase::Draining => {
                    self.phase = Phase::Done;
                    return None;
                }
                Phase::Running => {}
            }

            let produced = match self.inner.next().await {
                Some(Ok(item)) => self.converter.convert(item),
                Some(Err(e)) => Err(e),
                None => {
                    self.phase = Phase::Draining;
                    self.converter.finish()
                }
            };
            match produced {
                Ok(items) => self.queue.extend(items),
                Err(e) => {
                    self.phase = Phase::Done;
                    self.queue.clear();
                    return Some(Err(e));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.phase = Phase::Done;
        self.queue.clear();
        self.inner.close().await
    }
}
