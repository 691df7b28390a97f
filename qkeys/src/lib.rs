//! API-key selection across a provider's keys, with per-key failure tracking
//! and user-facing key management.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use qcommon::ProviderId;
//! use qkeys::{KeyManager, KeySelector, NewApiKey};
//! use qstore::InMemoryStore;
//!
//! # tokio_test_block_on(async {
//! let store = Arc::new(InMemoryStore::new());
//! let manager = KeyManager::new(store.clone());
//! manager.add_key(NewApiKey::new("openai", "sk-live-1").with_id("k1")).await?;
//!
//! let selector = KeySelector::new(store);
//! let selection = selector.select_key(&ProviderId::from("openai"), None).await?;
//! assert_eq!(selection.key.map(|key| key.id.to_string()), Some("k1".to_string()));
//! # Ok::<(), qkeys::KeyError>(())
//! # }).expect("example should run");
//! # fn tokio_test_block_on<F: std::future::Future>(future: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
//! # }
//! ```

mod error;
mod hooks;
mod manager;
mod selector;

pub use error::{KeyError, KeyErrorKind};
pub use hooks::{KeySelectionHooks, NoopKeySelectionHooks};
pub use manager::{KeyManager, NewApiKey, ProviderPolicyUpdate};
pub use selector::{KeySelection, KeySelector, NO_ELIGIBLE_KEY};

pub mod prelude {
    pub use crate::{
        KeyError, KeyErrorKind, KeyManager, KeySelection, KeySelectionHooks, KeySelector,
        NewApiKey, NoopKeySelectionHooks, ProviderPolicyUpdate,
    };
}
