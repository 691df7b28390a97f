//! Common `qprovider` imports for downstream crates.

pub use crate::{
    ChatChunkStream, ChatProvider, ChunkStream, Message, ProviderError, ProviderErrorKind,
    ProviderRegistry, Role, StreamChunk, StreamRequest, VecChunkStream,
};
pub use qcommon::{BoxFuture, ProviderId, SecretString};
