//! Store contracts, backend selection, and the in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use qcommon::{BoxFuture, KeyId, MessageId, ProviderId, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::backends::sqlite::default_sqlite_path;
use crate::error::StoreError;
use crate::types::{ApiKey, ContentBlock, KeyStatus, ProviderPolicy, UsageUpdate};

pub use crate::backends::sqlite::SqliteStore;

/// Per-provider API-key records and selection policy.
///
/// Counter updates go through [`KeyStore::increment_usage`], which applies the
/// increments and any resulting status transition as one atomic step so
/// concurrent reports for the same key never lose an update.
pub trait KeyStore: Send + Sync {
    fn keys_by_provider<'a>(
        &'a self,
        provider_id: &'a ProviderId,
    ) -> BoxFuture<'a, Result<Vec<ApiKey>, StoreError>>;

    fn get_key<'a>(&'a self, key_id: &'a KeyId)
    -> BoxFuture<'a, Result<Option<ApiKey>, StoreError>>;

    fn insert_key<'a>(&'a self, key: ApiKey) -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete_key<'a>(&'a self, key_id: &'a KeyId) -> BoxFuture<'a, Result<bool, StoreError>>;

    fn get_policy<'a>(
        &'a self,
        provider_id: &'a ProviderId,
    ) -> BoxFuture<'a, Result<Option<ProviderPolicy>, StoreError>>;

    fn put_policy<'a>(
        &'a self,
        provider_id: &'a ProviderId,
        policy: ProviderPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Returns the updated record, or `None` when the key does not exist.
    /// Keys that are disabled are returned unchanged.
    fn increment_usage<'a>(
        &'a self,
        key_id: &'a KeyId,
        update: UsageUpdate,
    ) -> BoxFuture<'a, Result<Option<ApiKey>, StoreError>>;

    fn set_status<'a>(
        &'a self,
        key_id: &'a KeyId,
        status: KeyStatus,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// User toggle. Disabling sets `Disabled`; enabling returns the key to
    /// `Active` with a clean failure streak.
    fn set_enabled<'a>(
        &'a self,
        key_id: &'a KeyId,
        enabled: bool,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    fn set_priority<'a>(
        &'a self,
        key_id: &'a KeyId,
        priority: i32,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Marks one key primary and clears the flag on its provider siblings.
    fn set_primary<'a>(
        &'a self,
        key_id: &'a KeyId,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;
}

/// Durable content blocks keyed by message.
pub trait BlockStore: Send + Sync {
    /// Deletes every stored block of `message_id` and inserts `blocks` in one
    /// transaction.
    fn replace_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
        blocks: Vec<ContentBlock>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Blocks of one message ordered by `sort_order`.
    fn load_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, Result<Vec<ContentBlock>, StoreError>>;

    fn delete_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, Result<usize, StoreError>>;
}

/// A backend that serves both halves of the store contract.
pub trait ChatStore: KeyStore + BlockStore {}

impl<T> ChatStore for T where T: KeyStore + BlockStore {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreBackendConfig {
    Sqlite { path: PathBuf },
    InMemory,
}

impl Default for StoreBackendConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

pub fn create_store(
    config: StoreBackendConfig,
    retry: RetryPolicy,
) -> Result<Arc<dyn ChatStore>, StoreError> {
    match config {
        StoreBackendConfig::Sqlite { path } => {
            Ok(Arc::new(SqliteStore::new(path)?.with_retry_policy(retry)))
        }
        StoreBackendConfig::InMemory => Ok(Arc::new(InMemoryStore::new())),
    }
}

pub fn create_default_store() -> Result<Arc<dyn ChatStore>, StoreError> {
    create_store(StoreBackendConfig::default(), RetryPolicy::default())
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    keys: BTreeMap<KeyId, ApiKey>,
    policies: HashMap<ProviderId, ProviderPolicy>,
    blocks: HashMap<MessageId, Vec<ContentBlock>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, InMemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::storage("in-memory store lock poisoned"))
    }
}

/// Transition table for one outcome report. The SQLite backend expresses the
/// same table as a single `UPDATE`.
pub(crate) fn apply_usage_update(key: &mut ApiKey, update: &UsageUpdate) {
    if !key.is_enabled || key.status == KeyStatus::Disabled {
        return;
    }

    key.usage.total_requests += 1;
    if update.success {
        key.usage.successful_requests += 1;
        key.usage.consecutive_failures = 0;
        key.usage.last_used_at = Some(update.at);
        if key.status == KeyStatus::Error {
            key.status = KeyStatus::Active;
        }
    } else {
        key.usage.failed_requests += 1;
        key.usage.consecutive_failures += 1;
        key.last_error = update.error_message.clone();
        if key.usage.consecutive_failures >= update.failure_threshold {
            key.status = KeyStatus::Error;
        }
    }
    key.updated_at = update.at;
}

impl KeyStore for InMemoryStore {
    fn keys_by_provider<'a>(
        &'a self,
        provider_id: &'a ProviderId,
    ) -> BoxFuture<'a, Result<Vec<ApiKey>, StoreError>> {
        Box::pin(async move {
            let state = self.state()?;
            Ok(state
                .keys
                .values()
                .filter(|key| &key.provider_id == provider_id)
                .cloned()
                .collect())
        })
    }

    fn get_key<'a>(
        &'a self,
        key_id: &'a KeyId,
    ) -> BoxFuture<'a, Result<Option<ApiKey>, StoreError>> {
        Box::pin(async move { Ok(self.state()?.keys.get(key_id).cloned()) })
    }

    fn insert_key<'a>(&'a self, key: ApiKey) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            if state.keys.contains_key(&key.id) {
                return Err(StoreError::invalid_request(format!(
                    "api key '{}' already exists",
                    key.id
                )));
            }

            state.keys.insert(key.id.clone(), key);
            Ok(())
        })
    }

    fn delete_key<'a>(&'a self, key_id: &'a KeyId) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.state()?.keys.remove(key_id).is_some()) })
    }

    fn get_policy<'a>(
        &'a self,
        provider_id: &'a ProviderId,
    ) -> BoxFuture<'a, Result<Option<ProviderPolicy>, StoreError>> {
        Box::pin(async move { Ok(self.state()?.policies.get(provider_id).cloned()) })
    }

    fn put_policy<'a>(
        &'a self,
        provider_id: &'a ProviderId,
        policy: ProviderPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.state()?.policies.insert(provider_id.clone(), policy);
            Ok(())
        })
    }

    fn increment_usage<'a>(
        &'a self,
        key_id: &'a KeyId,
        update: UsageUpdate,
    ) -> BoxFuture<'a, Result<Option<ApiKey>, StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            let Some(key) = state.keys.get_mut(key_id) else {
                return Ok(None);
            };

            apply_usage_update(key, &update);
            Ok(Some(key.clone()))
        })
    }

    fn set_status<'a>(
        &'a self,
        key_id: &'a KeyId,
        status: KeyStatus,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            let Some(key) = state.keys.get_mut(key_id) else {
                return Ok(false);
            };

            key.status = status;
            key.updated_at = at;
            Ok(true)
        })
    }

    fn set_enabled<'a>(
        &'a self,
        key_id: &'a KeyId,
        enabled: bool,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            let Some(key) = state.keys.get_mut(key_id) else {
                return Ok(false);
            };

            if enabled {
                // Enabling an enabled key leaves the breaker alone.
                if key.is_enabled && key.status != KeyStatus::Disabled {
                    return Ok(true);
                }
                key.status = KeyStatus::Active;
                key.usage.consecutive_failures = 0;
                key.last_error = None;
            } else {
                key.status = KeyStatus::Disabled;
            }
            key.is_enabled = enabled;
            key.updated_at = at;
            Ok(true)
        })
    }

    fn set_priority<'a>(
        &'a self,
        key_id: &'a KeyId,
        priority: i32,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            let Some(key) = state.keys.get_mut(key_id) else {
                return Ok(false);
            };

            key.priority = priority;
            key.updated_at = at;
            Ok(true)
        })
    }

    fn set_primary<'a>(
        &'a self,
        key_id: &'a KeyId,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            let Some(provider_id) = state.keys.get(key_id).map(|key| key.provider_id.clone())
            else {
                return Ok(false);
            };

            for key in state.keys.values_mut() {
                if key.provider_id != provider_id {
                    continue;
                }

                let primary = &key.id == key_id;
                if key.is_primary != primary {
                    key.is_primary = primary;
                    key.updated_at = at;
                }
            }
            Ok(true)
        })
    }
}

impl BlockStore for InMemoryStore {
    fn replace_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
        blocks: Vec<ContentBlock>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if let Some(foreign) = blocks.iter().find(|block| &block.message_id != message_id) {
                return Err(StoreError::invalid_request(format!(
                    "block '{}' belongs to message '{}', not '{message_id}'",
                    foreign.id, foreign.message_id
                )));
            }

            let mut ordered = blocks;
            ordered.sort_by_key(|block| block.sort_order);
            self.state()?.blocks.insert(message_id.clone(), ordered);
            Ok(())
        })
    }

    fn load_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, Result<Vec<ContentBlock>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .state()?
                .blocks
                .get(message_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn delete_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, Result<usize, StoreError>> {
        Box::pin(async move {
            Ok(self
                .state()?
                .blocks
                .remove(message_id)
                .map(|blocks| blocks.len())
                .unwrap_or(0))
        })
    }
}
