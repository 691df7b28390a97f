//! Common imports for most quill applications.

pub use crate::{
    assistant_message, build_runtime, build_runtime_with, build_runtime_with_store,
    init_tracing, parse_strategy, system_message, tool_message, turn, user_message,
};
pub use crate::{quill_history, quill_msg};
pub use crate::{
    ApiKey, BlockSnapshot, BlockStatus, BlockType, ChatError, ChatErrorKind, ChatProvider,
    ChatStore, ChunkStream, ContentBlock, KeyId, KeyManager, KeySelector, KeyStatus, Message,
    MessageId, NewApiKey, ProviderError, ProviderId, ProviderPolicyUpdate, ProviderRegistry,
    QuillConfig, QuillError, Role, RuntimeBundle, SelectionStrategy, StreamChunk,
    StreamOutcome, ToolOutcome, TurnControls, TurnError, TurnRequest, TurnResult, TurnRunner,
};
