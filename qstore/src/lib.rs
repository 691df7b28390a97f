//! Persistence layer for API-key records, provider policies, and content blocks.

mod backends;
mod error;
mod store;
mod types;

pub mod prelude {
    pub use crate::{
        ApiKey, BlockStatus, BlockStore, BlockType, ChatStore, ContentBlock, InMemoryStore,
        KeyStatus, KeyStore, KeyUsage, KeyUsageSummary, ProviderPolicy, SelectionStrategy,
        SqliteStore, StoreBackendConfig, StoreError, StoreErrorKind, UsageUpdate,
        create_default_store, create_store,
    };
}

pub use backends::sqlite::default_sqlite_path;
pub use error::{StoreError, StoreErrorKind};
pub use store::{
    BlockStore, ChatStore, InMemoryStore, KeyStore, SqliteStore, StoreBackendConfig,
    create_default_store, create_store,
};
pub use types::{
    ApiKey, BlockStatus, BlockType, ContentBlock, DEFAULT_COOLDOWN_MINUTES,
    DEFAULT_MAX_FAILURES_BEFORE_DISABLE, KeyStatus, KeyUsage, KeyUsageSummary, ProviderPolicy,
    SelectionStrategy, UsageUpdate,
};
