use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use qcommon::{
    BlockId, BoxFuture, KeyId, MessageId, NoopRetryHooks, ProviderId, RetryHooks, RetryPolicy,
    SecretString, execute_with_retry,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::error::StoreError;
use crate::store::{BlockStore, KeyStore};
use crate::types::{
    ApiKey, BlockStatus, BlockType, ContentBlock, KeyStatus, KeyUsage, ProviderPolicy,
    SelectionStrategy, UsageUpdate,
};

const SCHEMA_VERSION: i64 = 1;

const KEY_COLUMNS: &str = "
    id, provider_id, secret, label, is_enabled, is_primary, priority, status, last_error,
    total_requests, successful_requests, failed_requests, consecutive_failures,
    last_used_at_secs, last_used_at_nanos,
    created_at_secs, created_at_nanos, updated_at_secs, updated_at_nanos
";

const BLOCK_COLUMNS: &str = "
    id, message_id, block_type, status, content, sort_order,
    tool_call_id, tool_name, tool_args,
    created_at_secs, created_at_nanos, updated_at_secs, updated_at_nanos
";

pub fn default_sqlite_path() -> PathBuf {
    PathBuf::from(".quill").join("quill.db")
}

/// SQLite-backed store.
///
/// A single connection behind a mutex is the only writer; every operation is
/// wrapped in the configured retry policy so `SQLITE_BUSY` / `SQLITE_LOCKED`
/// from other processes sharing the file are retried with backoff.
pub struct SqliteStore {
    connection: Mutex<Connection>,
    retry: RetryPolicy,
    hooks: Arc<dyn RetryHooks>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::storage(format!("failed to create sqlite parent directory: {error}"))
            })?;
        }

        let connection = Connection::open(path)
            .map_err(|error| sqlite_error("failed to open sqlite database", error))?;
        Self::from_connection(connection)
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()
            .map_err(|error| sqlite_error("failed to open in-memory sqlite database", error))?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self, StoreError> {
        connection
            .busy_timeout(Duration::from_secs(5))
            .map_err(|error| sqlite_error("failed to configure sqlite busy timeout", error))?;
        let store = Self {
            connection: Mutex::new(connection),
            retry: RetryPolicy::default(),
            hooks: Arc::new(NoopRetryHooks),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_hooks(mut self, hooks: Arc<dyn RetryHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::storage("sqlite store lock poisoned"))
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                secret TEXT NOT NULL,
                label TEXT,
                is_enabled INTEGER NOT NULL,
                is_primary INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                last_error TEXT,
                total_requests INTEGER NOT NULL DEFAULT 0,
                successful_requests INTEGER NOT NULL DEFAULT 0,
                failed_requests INTEGER NOT NULL DEFAULT 0,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_used_at_secs INTEGER,
                last_used_at_nanos INTEGER,
                created_at_secs INTEGER NOT NULL,
                created_at_nanos INTEGER NOT NULL,
                updated_at_secs INTEGER NOT NULL,
                updated_at_nanos INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_api_keys_provider
            ON api_keys(provider_id, id);

            CREATE TABLE IF NOT EXISTS provider_policies (
                provider_id TEXT PRIMARY KEY,
                strategy TEXT NOT NULL,
                max_failures_before_disable INTEGER NOT NULL,
                cooldown_minutes INTEGER NOT NULL,
                updated_at_secs INTEGER NOT NULL,
                updated_at_nanos INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS content_blocks (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                block_type TEXT NOT NULL,
                status TEXT NOT NULL,
                content TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                tool_call_id TEXT,
                tool_name TEXT,
                tool_args TEXT,
                created_at_secs INTEGER NOT NULL,
                created_at_nanos INTEGER NOT NULL,
                updated_at_secs INTEGER NOT NULL,
                updated_at_nanos INTEGER NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_content_blocks_message_order
            ON content_blocks(message_id, sort_order);
            ",
        )
        .map_err(|error| sqlite_error("failed to initialize sqlite schema", error))?;

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|error| sqlite_error("failed to read schema version", error))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::storage(format!(
                "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|error| sqlite_error("failed to record schema version", error))?;
        }

        Ok(())
    }

    /// Runs `apply` on the single connection under the retry policy.
    async fn run<T, F>(&self, operation: &'static str, mut apply: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Connection) -> Result<T, StoreError>,
    {
        execute_with_retry(
            operation,
            &self.retry,
            self.hooks.as_ref(),
            |_| {
                let result = self
                    .connection()
                    .and_then(|mut conn| apply(&mut conn));
                std::future::ready(result)
            },
            tokio::time::sleep,
        )
        .await
    }

    fn select_key(conn: &Connection, key_id: &KeyId) -> Result<Option<ApiKey>, StoreError> {
        conn.query_row(
            &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
            params![key_id.as_str()],
            read_key_row,
        )
        .optional()
        .map_err(|error| sqlite_error("failed to load api key", error))?
        .transpose()
    }
}

impl KeyStore for SqliteStore {
    fn keys_by_provider<'a>(
        &'a self,
        provider_id: &'a ProviderId,
    ) -> BoxFuture<'a, Result<Vec<ApiKey>, StoreError>> {
        Box::pin(async move {
            self.run("store.keys_by_provider", |conn| {
                let mut statement = conn
                    .prepare(&format!(
                        "SELECT {KEY_COLUMNS} FROM api_keys WHERE provider_id = ?1 ORDER BY id"
                    ))
                    .map_err(|error| sqlite_error("failed to prepare api key query", error))?;
                let rows = statement
                    .query_map(params![provider_id.as_str()], read_key_row)
                    .map_err(|error| sqlite_error("failed to query api keys", error))?;

                let mut keys = Vec::new();
                for row in rows {
                    let key = row.map_err(|error| sqlite_error("failed to read api key", error))?;
                    keys.push(key?);
                }
                Ok(keys)
            })
            .await
        })
    }

    fn get_key<'a>(
        &'a self,
        key_id: &'a KeyId,
    ) -> BoxFuture<'a, Result<Option<ApiKey>, StoreError>> {
        Box::pin(async move {
            self.run("store.get_key", |conn| Self::select_key(conn, key_id))
                .await
        })
    }

    fn insert_key<'a>(&'a self, key: ApiKey) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let (created_secs, created_nanos) = encode_system_time(key.created_at)?;
            let (updated_secs, updated_nanos) = encode_system_time(key.updated_at)?;
            let (last_used_secs, last_used_nanos) = match key.usage.last_used_at {
                Some(value) => {
                    let (secs, nanos) = encode_system_time(value)?;
                    (Some(secs), Some(nanos))
                }
                None => (None, None),
            };

            self.run("store.insert_key", |conn| {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM api_keys WHERE id = ?1",
                        params![key.id.as_str()],
                        |_| Ok(true),
                    )
                    .optional()
                    .map_err(|error| sqlite_error("failed to check api key id", error))?
                    .unwrap_or(false);
                if exists {
                    return Err(StoreError::invalid_request(format!(
                        "api key '{}' already exists",
                        key.id
                    )));
                }

                conn.execute(
                    &format!(
                        "INSERT INTO api_keys ({KEY_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                                 ?14, ?15, ?16, ?17, ?18, ?19)"
                    ),
                    params![
                        key.id.as_str(),
                        key.provider_id.as_str(),
                        key.secret.expose(),
                        key.label.as_deref(),
                        key.is_enabled,
                        key.is_primary,
                        key.priority,
                        key.status.as_str(),
                        key.last_error.as_deref(),
                        to_sql_count(key.usage.total_requests)?,
                        to_sql_count(key.usage.successful_requests)?,
                        to_sql_count(key.usage.failed_requests)?,
                        i64::from(key.usage.consecutive_failures),
                        last_used_secs,
                        last_used_nanos,
                        created_secs,
                        created_nanos,
                        updated_secs,
                        updated_nanos,
                    ],
                )
                .map_err(|error| sqlite_error("failed to insert api key", error))?;
                Ok(())
            })
            .await
        })
    }

    fn delete_key<'a>(&'a self, key_id: &'a KeyId) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            self.run("store.delete_key", |conn| {
                let deleted = conn
                    .execute("DELETE FROM api_keys WHERE id = ?1", params![key_id.as_str()])
                    .map_err(|error| sqlite_error("failed to delete api key", error))?;
                Ok(deleted > 0)
            })
            .await
        })
    }

    fn get_policy<'a>(
        &'a self,
        provider_id: &'a ProviderId,
    ) -> BoxFuture<'a, Result<Option<ProviderPolicy>, StoreError>> {
        Box::pin(async move {
            self.run("store.get_policy", |conn| {
                conn.query_row(
                    "
                    SELECT strategy, max_failures_before_disable, cooldown_minutes,
                           updated_at_secs, updated_at_nanos
                    FROM provider_policies
                    WHERE provider_id = ?1
                    ",
                    params![provider_id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(|error| sqlite_error("failed to load provider policy", error))?
                .map(|(strategy, max_failures, cooldown, secs, nanos)| {
                    Ok(ProviderPolicy {
                        strategy: SelectionStrategy::parse(&strategy).ok_or_else(|| {
                            StoreError::storage(format!("unknown selection strategy '{strategy}'"))
                        })?,
                        max_failures_before_disable: from_sql_u32(max_failures)?,
                        cooldown_minutes: from_sql_u32(cooldown)?,
                        updated_at: decode_system_time(secs, nanos)?,
                    })
                })
                .transpose()
            })
            .await
        })
    }

    fn put_policy<'a>(
        &'a self,
        provider_id: &'a ProviderId,
        policy: ProviderPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let (secs, nanos) = encode_system_time(policy.updated_at)?;
            self.run("store.put_policy", |conn| {
                conn.execute(
                    "
                    INSERT INTO provider_policies (
                        provider_id,
                        strategy,
                        max_failures_before_disable,
                        cooldown_minutes,
                        updated_at_secs,
                        updated_at_nanos
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(provider_id) DO UPDATE SET
                        strategy = excluded.strategy,
                        max_failures_before_disable = excluded.max_failures_before_disable,
                        cooldown_minutes = excluded.cooldown_minutes,
                        updated_at_secs = excluded.updated_at_secs,
                        updated_at_nanos = excluded.updated_at_nanos
                    ",
                    params![
                        provider_id.as_str(),
                        policy.strategy.as_str(),
                        i64::from(policy.max_failures_before_disable),
                        i64::from(policy.cooldown_minutes),
                        secs,
                        nanos,
                    ],
                )
                .map_err(|error| sqlite_error("failed to upsert provider policy", error))?;
                Ok(())
            })
            .await
        })
    }

    fn increment_usage<'a>(
        &'a self,
        key_id: &'a KeyId,
        update: UsageUpdate,
    ) -> BoxFuture<'a, Result<Option<ApiKey>, StoreError>> {
        Box::pin(async move {
            let (secs, nanos) = encode_system_time(update.at)?;
            self.run("store.increment_usage", |conn| {
                // Right-hand sides see the pre-update row, so the threshold
                // check compares against the incremented streak.
                let result = if update.success {
                    conn.execute(
                        "
                        UPDATE api_keys SET
                            total_requests = total_requests + 1,
                            successful_requests = successful_requests + 1,
                            consecutive_failures = 0,
                            last_used_at_secs = ?2,
                            last_used_at_nanos = ?3,
                            status = CASE WHEN status = 'error' THEN 'active' ELSE status END,
                            updated_at_secs = ?2,
                            updated_at_nanos = ?3
                        WHERE id = ?1 AND is_enabled = 1 AND status != 'disabled'
                        ",
                        params![key_id.as_str(), secs, nanos],
                    )
                } else {
                    conn.execute(
                        "
                        UPDATE api_keys SET
                            total_requests = total_requests + 1,
                            failed_requests = failed_requests + 1,
                            consecutive_failures = consecutive_failures + 1,
                            last_error = ?4,
                            status = CASE
                                WHEN consecutive_failures + 1 >= ?5 THEN 'error'
                                ELSE status
                            END,
                            updated_at_secs = ?2,
                            updated_at_nanos = ?3
                        WHERE id = ?1 AND is_enabled = 1 AND status != 'disabled'
                        ",
                        params![
                            key_id.as_str(),
                            secs,
                            nanos,
                            update.error_message.as_deref(),
                            i64::from(update.failure_threshold),
                        ],
                    )
                };
                result.map_err(|error| sqlite_error("failed to record key usage", error))?;

                Self::select_key(conn, key_id)
            })
            .await
        })
    }

    fn set_status<'a>(
        &'a self,
        key_id: &'a KeyId,
        status: KeyStatus,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let (secs, nanos) = encode_system_time(at)?;
            self.run("store.set_status", |conn| {
                let updated = conn
                    .execute(
                        "
                        UPDATE api_keys
                        SET status = ?2, updated_at_secs = ?3, updated_at_nanos = ?4
                        WHERE id = ?1
                        ",
                        params![key_id.as_str(), status.as_str(), secs, nanos],
                    )
                    .map_err(|error| sqlite_error("failed to update key status", error))?;
                Ok(updated > 0)
            })
            .await
        })
    }

    fn set_enabled<'a>(
        &'a self,
        key_id: &'a KeyId,
        enabled: bool,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let (secs, nanos) = encode_system_time(at)?;
            self.run("store.set_enabled", |conn| {
                let updated = if enabled {
                    conn.execute(
                        "
                        UPDATE api_keys SET
                            status = CASE WHEN is_enabled = 0 OR status = 'disabled'
                                THEN 'active' ELSE status END,
                            consecutive_failures = CASE WHEN is_enabled = 0 OR status = 'disabled'
                                THEN 0 ELSE consecutive_failures END,
                            last_error = CASE WHEN is_enabled = 0 OR status = 'disabled'
                                THEN NULL ELSE last_error END,
                            updated_at_secs = CASE WHEN is_enabled = 0 OR status = 'disabled'
                                THEN ?2 ELSE updated_at_secs END,
                            updated_at_nanos = CASE WHEN is_enabled = 0 OR status = 'disabled'
                                THEN ?3 ELSE updated_at_nanos END,
                            is_enabled = 1
                        WHERE id = ?1
                        ",
                        params![key_id.as_str(), secs, nanos],
                    )
                } else {
                    conn.execute(
                        "
                        UPDATE api_keys SET
                            is_enabled = 0,
                            status = 'disabled',
                            updated_at_secs = ?2,
                            updated_at_nanos = ?3
                        WHERE id = ?1
                        ",
                        params![key_id.as_str(), secs, nanos],
                    )
                }
                .map_err(|error| sqlite_error("failed to toggle api key", error))?;
                Ok(updated > 0)
            })
            .await
        })
    }

    fn set_priority<'a>(
        &'a self,
        key_id: &'a KeyId,
        priority: i32,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let (secs, nanos) = encode_system_time(at)?;
            self.run("store.set_priority", |conn| {
                let updated = conn
                    .execute(
                        "
                        UPDATE api_keys
                        SET priority = ?2, updated_at_secs = ?3, updated_at_nanos = ?4
                        WHERE id = ?1
                        ",
                        params![key_id.as_str(), priority, secs, nanos],
                    )
                    .map_err(|error| sqlite_error("failed to update key priority", error))?;
                Ok(updated > 0)
            })
            .await
        })
    }

    fn set_primary<'a>(
        &'a self,
        key_id: &'a KeyId,
        at: SystemTime,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let (secs, nanos) = encode_system_time(at)?;
            self.run("store.set_primary", |conn| {
                let tx = conn
                    .transaction()
                    .map_err(|error| sqlite_error("failed to begin transaction", error))?;
                let provider_id: Option<String> = tx
                    .query_row(
                        "SELECT provider_id FROM api_keys WHERE id = ?1",
                        params![key_id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|error| sqlite_error("failed to load api key provider", error))?;
                let Some(provider_id) = provider_id else {
                    return Ok(false);
                };

                tx.execute(
                    "
                    UPDATE api_keys
                    SET is_primary = (id = ?1), updated_at_secs = ?3, updated_at_nanos = ?4
                    WHERE provider_id = ?2 AND is_primary != (id = ?1)
                    ",
                    params![key_id.as_str(), provider_id, secs, nanos],
                )
                .map_err(|error| sqlite_error("failed to update primary key", error))?;
                tx.commit()
                    .map_err(|error| sqlite_error("failed to commit primary key", error))?;
                Ok(true)
            })
            .await
        })
    }
}

impl BlockStore for SqliteStore {
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

            let mut rows = Vec::with_capacity(blocks.len());
            for block in &blocks {
                let created = encode_system_time(block.created_at)?;
                let updated = encode_system_time(block.updated_at)?;
                rows.push((block, created, updated));
            }

            self.run("store.replace_blocks", |conn| {
                let tx = conn
                    .transaction()
                    .map_err(|error| sqlite_error("failed to begin transaction", error))?;
                tx.execute(
                    "DELETE FROM content_blocks WHERE message_id = ?1",
                    params![message_id.as_str()],
                )
                .map_err(|error| sqlite_error("failed to clear content blocks", error))?;

                for (block, (created_secs, created_nanos), (updated_secs, updated_nanos)) in &rows {
                    tx.execute(
                        &format!(
                            "INSERT INTO content_blocks ({BLOCK_COLUMNS})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                        ),
                        params![
                            block.id.as_str(),
                            block.message_id.as_str(),
                            block.block_type.as_str(),
                            block.status.as_str(),
                            &block.content,
                            i64::from(block.sort_order),
                            block.tool_call_id.as_deref(),
                            block.tool_name.as_deref(),
                            block.tool_args.as_deref(),
                            created_secs,
                            created_nanos,
                            updated_secs,
                            updated_nanos,
                        ],
                    )
                    .map_err(|error| sqlite_error("failed to write content block", error))?;
                }

                // Dropping an uncommitted transaction rolls it back, so an
                // early return above leaves the previous rows in place.
                tx.commit()
                    .map_err(|error| sqlite_error("failed to commit content blocks", error))?;
                Ok(())
            })
            .await
        })
    }

    fn load_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, Result<Vec<ContentBlock>, StoreError>> {
        Box::pin(async move {
            self.run("store.load_blocks", |conn| {
                let mut statement = conn
                    .prepare(&format!(
                        "SELECT {BLOCK_COLUMNS} FROM content_blocks
                         WHERE message_id = ?1 ORDER BY sort_order ASC"
                    ))
                    .map_err(|error| sqlite_error("failed to prepare block query", error))?;
                let rows = statement
                    .query_map(params![message_id.as_str()], read_block_row)
                    .map_err(|error| sqlite_error("failed to query content blocks", error))?;

                let mut blocks = Vec::new();
                for row in rows {
                    let block =
                        row.map_err(|error| sqlite_error("failed to read content block", error))?;
                    blocks.push(block?);
                }
                Ok(blocks)
            })
            .await
        })
    }

    fn delete_blocks<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, Result<usize, StoreError>> {
        Box::pin(async move {
            self.run("store.delete_blocks", |conn| {
                conn.execute(
                    "DELETE FROM content_blocks WHERE message_id = ?1",
                    params![message_id.as_str()],
                )
                .map_err(|error| sqlite_error("failed to delete content blocks", error))
            })
            .await
        })
    }
}

/// Row mapper; decoding errors are carried in the inner `Result` so they keep
/// the store's error type.
fn read_key_row(row: &Row<'_>) -> rusqlite::Result<Result<ApiKey, StoreError>> {
    let status: String = row.get(7)?;
    let total: i64 = row.get(9)?;
    let successful: i64 = row.get(10)?;
    let failed: i64 = row.get(11)?;
    let consecutive: i64 = row.get(12)?;
    let last_used: (Option<i64>, Option<i64>) = (row.get(13)?, row.get(14)?);
    let created: (i64, i64) = (row.get(15)?, row.get(16)?);
    let updated: (i64, i64) = (row.get(17)?, row.get(18)?);
    let id: String = row.get(0)?;
    let provider_id: String = row.get(1)?;
    let secret: String = row.get(2)?;
    let label: Option<String> = row.get(3)?;
    let is_enabled: bool = row.get(4)?;
    let is_primary: bool = row.get(5)?;
    let priority: i32 = row.get(6)?;
    let last_error: Option<String> = row.get(8)?;

    Ok((|| -> Result<ApiKey, StoreError> {
        let last_used_at = match last_used {
            (Some(secs), Some(nanos)) => Some(decode_system_time(secs, nanos)?),
            _ => None,
        };

        Ok(ApiKey {
            id: KeyId::from(id),
            provider_id: ProviderId::from(provider_id),
            secret: SecretString::new(secret),
            label,
            is_enabled,
            is_primary,
            priority,
            status: KeyStatus::parse(&status)
                .ok_or_else(|| StoreError::storage(format!("unknown key status '{status}'")))?,
            last_error,
            usage: KeyUsage {
                total_requests: from_sql_count(total)?,
                successful_requests: from_sql_count(successful)?,
                failed_requests: from_sql_count(failed)?,
                consecutive_failures: from_sql_u32(consecutive)?,
                last_used_at,
            },
            created_at: decode_system_time(created.0, created.1)?,
            updated_at: decode_system_time(updated.0, updated.1)?,
        })
    })())
}

fn read_block_row(row: &Row<'_>) -> rusqlite::Result<Result<ContentBlock, StoreError>> {
    let id: String = row.get(0)?;
    let message_id: String = row.get(1)?;
    let block_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let content: String = row.get(4)?;
    let sort_order: i64 = row.get(5)?;
    let tool_call_id: Option<String> = row.get(6)?;
    let tool_name: Option<String> = row.get(7)?;
    let tool_args: Option<String> = row.get(8)?;
    let created: (i64, i64) = (row.get(9)?, row.get(10)?);
    let updated: (i64, i64) = (row.get(11)?, row.get(12)?);

    Ok((|| -> Result<ContentBlock, StoreError> {
        Ok(ContentBlock {
            id: BlockId::from(id),
            message_id: MessageId::from(message_id),
            block_type: BlockType::parse(&block_type).ok_or_else(|| {
                StoreError::storage(format!("unknown block type '{block_type}'"))
            })?,
            status: BlockStatus::parse(&status)
                .ok_or_else(|| StoreError::storage(format!("unknown block status '{status}'")))?,
            content,
            sort_order: from_sql_u32(sort_order)?,
            tool_call_id,
            tool_name,
            tool_args,
            created_at: decode_system_time(created.0, created.1)?,
            updated_at: decode_system_time(updated.0, updated.1)?,
        })
    })())
}

fn sqlite_error(context: &str, error: rusqlite::Error) -> StoreError {
    let busy = matches!(
        error.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    );
    if busy {
        StoreError::busy(format!("{context}: {error}"))
    } else {
        StoreError::storage(format!("{context}: {error}"))
    }
}

fn to_sql_count(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::invalid_request(format!("counter {value} exceeds sqlite range")))
}

fn from_sql_count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::storage(format!("counter must be non-negative, got {value}")))
}

fn from_sql_u32(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::storage(format!("value {value} is out of range for u32")))
}

fn encode_system_time(value: SystemTime) -> Result<(i64, i64), StoreError> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        StoreError::invalid_request(format!("timestamp predates unix epoch: {error}"))
    })?;
    Ok((
        duration.as_secs() as i64,
        i64::from(duration.subsec_nanos()),
    ))
}

fn decode_system_time(seconds: i64, nanos: i64) -> Result<SystemTime, StoreError> {
    if seconds < 0 {
        return Err(StoreError::storage(format!(
            "timestamp seconds must be non-negative, got {seconds}"
        )));
    }
    if !(0..1_000_000_000).contains(&nanos) {
        return Err(StoreError::storage(format!(
            "timestamp nanos must be in [0, 1_000_000_000), got {nanos}"
        )));
    }
    Ok(UNIX_EPOCH + Duration::new(seconds as u64, nanos as u32))
}
