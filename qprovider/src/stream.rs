//! Streaming chunk contracts and in-memory stream utilities.
//!
//! ```rust
//! use qprovider::{ChunkStream, StreamChunk, VecChunkStream};
//!
//! let stream = VecChunkStream::new(vec![Ok(StreamChunk::TextDelta("hello".into()))]);
//! let _boxed: ChunkStream<'static> = Box::pin(stream);
//! ```

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    TextDelta(String),
    ToolCallStart {
        id: String,
        name: String,
        args: String,
    },
    ToolCallResult {
        id: String,
        content: String,
    },
    ToolCallError {
        id: String,
        message: String,
    },
    Done,
    /// Provider-reported failure delivered in-band.
    Error(String),
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

/// Provider stream contract.
///
/// Invariants for consumers:
/// - Chunks are emitted in source order.
/// - `Done` and `Error` are terminal; nothing after them is meaningful.
/// - `Err(ProviderError)` items are transport failures and also end the turn.
pub trait ChatChunkStream: Stream<Item = Result<StreamChunk, ProviderError>> + Send {}

impl<T> ChatChunkStream for T where T: Stream<Item = Result<StreamChunk, ProviderError>> + Send {}

pub type ChunkStream<'a> = Pin<Box<dyn ChatChunkStream + 'a>>;

#[derive(Debug)]
pub struct VecChunkStream {
    chunks: VecDeque<Result<StreamChunk, ProviderError>>,
}

impl VecChunkStream {
    pub fn new(chunks: Vec<Result<StreamChunk, ProviderError>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }
}

impl Stream for VecChunkStream {
    type Item = Result<StreamChunk, ProviderError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<StreamChunk, ProviderError>>> {
        Poll::Ready(self.chunks.pop_front())
    }
}
