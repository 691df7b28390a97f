use qcommon::{BoxFuture, ProviderId};

use crate::{ChunkStream, ProviderError, StreamRequest};

/// Streaming chat client for one provider.
///
/// Opening the stream may fail (bad key, rate limit, network); failures after
/// the stream is open are delivered as stream items.
pub trait ChatProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn stream<'a>(
        &'a self,
        request: StreamRequest,
    ) -> BoxFuture<'a, Result<ChunkStream<'a>, ProviderError>>;
}
