//! Unified facade over the quill workspace crates.
//!
//! Most applications depend on this crate alone: it re-exports the key
//! selector, block materializer, turn runner, stores, and provider contracts,
//! and wires them together from a TOML [`QuillConfig`].

mod config;
mod error;
mod logging;
mod macros;

pub mod prelude;
pub mod runtime;
pub mod util;

pub use qchat;
pub use qcommon;
pub use qkeys;
pub use qobserve;
pub use qprovider;
pub use qstore;

pub use config::{
    HookMode, ObservabilityConfig, PendingToolStatus, ProviderConfig, QuillConfig, RetryConfig,
    TurnConfig,
};
pub use error::{QuillError, QuillErrorKind};
pub use logging::{DEFAULT_LOG_FILTER, init_tracing};

pub use qchat::{
    BlockLifecycleHooks, BlockMaterializer, BlockSnapshot, BlockUpdate, ChatError,
    ChatErrorKind, INCOMPLETE_TOOL_MESSAGE, NewBlock, NoopBlockLifecycleHooks, StreamOutcome,
    TerminalPolicy, ToolOutcome, ToolSettlement, TurnControls, TurnError, TurnPolicy,
    TurnRequest, TurnResult, TurnRunner, UnflushedTurn,
};
pub use qcommon::{
    BlockId, BoxFuture, Clock, KeyId, ManualClock, MessageId, NoopRetryHooks, ProviderId,
    RetryHooks, RetryPolicy, Retryable, SystemClock, execute_with_retry,
};
pub use qkeys::{
    KeyError, KeyErrorKind, KeyManager, KeySelection, KeySelectionHooks, KeySelector,
    NO_ELIGIBLE_KEY, NewApiKey, NoopKeySelectionHooks, ProviderPolicyUpdate,
};
pub use qobserve::{
    MetricsObservabilityHooks, SafeBlockLifecycleHooks, SafeKeySelectionHooks, SafeRetryHooks,
    TracingObservabilityHooks,
};
pub use qprovider::{
    ChatChunkStream, ChatProvider, ChunkStream, Message, ProviderError, ProviderErrorKind,
    ProviderRegistry, Role, SecretString, StreamChunk, StreamRequest, VecChunkStream,
};
pub use qstore::{
    ApiKey, BlockStatus, BlockStore, BlockType, ChatStore, ContentBlock, InMemoryStore,
    KeyStatus, KeyStore, KeyUsage, KeyUsageSummary, ProviderPolicy, SelectionStrategy,
    SqliteStore, StoreBackendConfig, StoreError, StoreErrorKind, create_store,
};

pub use runtime::{RuntimeBundle, build_runtime, build_runtime_with, build_runtime_with_store};
pub use util::{
    assistant_message, parse_strategy, system_message, tool_message, turn, user_message,
};

#[cfg(test)]
mod tests {
    use crate::Role;

    #[test]
    fn quill_msg_macro_creates_expected_message() {
        let message = crate::quill_msg!(user => "hello");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content, "hello");
    }

    #[test]
    fn quill_history_macro_builds_message_vector() {
        let history = crate::quill_history![
            system => "You are concise.",
            user => "Summarize the repo",
        ];

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].role, Role::User);
        assert!(crate::quill_history![].is_empty());
    }
}
