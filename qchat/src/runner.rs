//! One assistant turn: key choice, provider stream, block assembly, and the
//! final write.

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use qcommon::{Clock, KeyId, NoopRetryHooks, RetryHooks, RetryPolicy, SystemClock};
use qkeys::KeySelector;
use qprovider::{ChatProvider, ChunkStream, ProviderError, ProviderRegistry, StreamRequest};
use qstore::{ApiKey, BlockStore, ContentBlock};

use crate::{
    BlockLifecycleHooks, BlockMaterializer, ChatError, ChatErrorKind, NoopBlockLifecycleHooks,
    StreamOutcome, TurnControls, TurnPolicy, TurnRequest, TurnResult,
};

/// A turn that did not finish.
///
/// When only the final write failed, `unflushed` carries the assembled
/// message so the caller can retry the write instead of losing it.
#[derive(Debug)]
pub struct TurnError {
    pub error: ChatError,
    pub unflushed: Option<UnflushedTurn>,
}

impl TurnError {
    pub fn kind(&self) -> ChatErrorKind {
        self.error.kind
    }

    pub fn into_unflushed(self) -> Option<UnflushedTurn> {
        self.unflushed
    }
}

impl From<ChatError> for TurnError {
    fn from(error: ChatError) -> Self {
        Self {
            error,
            unflushed: None,
        }
    }
}

impl Display for TurnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.error, f)
    }
}

impl Error for TurnError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// A streamed message whose blocks are assembled but not yet stored.
///
/// The live snapshot keeps showing the blocks until [`Self::finish`] runs.
pub struct UnflushedTurn {
    result: TurnResult,
    materializer: BlockMaterializer,
}

impl UnflushedTurn {
    pub fn result(&self) -> &TurnResult {
        &self.result
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        self.materializer.blocks()
    }

    /// Retries the single block write. `Ok(false)` means it already happened.
    pub async fn retry_flush(&mut self, policy: &RetryPolicy) -> Result<bool, ChatError> {
        self.materializer.persist_with_retry(policy).await
    }

    /// Releases the in-memory blocks and returns the turn summary.
    pub fn finish(mut self) -> TurnResult {
        self.materializer.cleanup();
        self.result
    }
}

impl Debug for UnflushedTurn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnflushedTurn")
            .field("result", &self.result)
            .field("persisted", &self.materializer.is_persisted())
            .finish()
    }
}

pub struct TurnRunner {
    selector: Arc<KeySelector>,
    providers: ProviderRegistry,
    store: Arc<dyn BlockStore>,
    policy: TurnPolicy,
    hooks: Arc<dyn BlockLifecycleHooks>,
    retry_hooks: Arc<dyn RetryHooks>,
    clock: Arc<dyn Clock>,
}

struct OpenedStream<'a> {
    key: ApiKey,
    stream: ChunkStream<'a>,
    attempts: u32,
}

impl TurnRunner {
    pub fn new(
        selector: Arc<KeySelector>,
        providers: ProviderRegistry,
        store: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            selector,
            providers,
            store,
            policy: TurnPolicy::default(),
            hooks: Arc::new(NoopBlockLifecycleHooks),
            retry_hooks: Arc::new(NoopRetryHooks),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_policy(mut self, policy: TurnPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn BlockLifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_retry_hooks(mut self, hooks: Arc<dyn RetryHooks>) -> Self {
        self.retry_hooks = hooks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &TurnPolicy {
        &self.policy
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn selector(&self) -> &Arc<KeySelector> {
        &self.selector
    }

    /// Runs one streamed turn to completion.
    ///
    /// The stream is opened with a selected key; opening failures that point
    /// at the key move on to another one. Whatever the stream outcome, the
    /// assembled blocks are written once and the key's outcome is recorded.
    /// A cancelled turn records nothing against the key. When the write
    /// still fails after retries, the blocks stay live and come back in
    /// [`TurnError::unflushed`].
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        controls: TurnControls,
    ) -> Result<TurnResult, TurnError> {
        validate_request(&request)?;
        let provider = self.providers.get(&request.provider_id).ok_or_else(|| {
            ChatError::invalid_request(format!(
                "provider '{}' is not registered",
                request.provider_id
            ))
        })?;

        let TurnControls {
            cancel,
            tool_results,
            snapshots,
        } = controls;

        let OpenedStream {
            key,
            stream,
            attempts,
        } = self.open_stream(provider.as_ref(), &request).await?;

        tracing::debug!(
            provider_id = %request.provider_id,
            message_id = %request.message_id,
            key_id = %key.id,
            attempts,
            "turn stream opened"
        );

        let mut materializer =
            BlockMaterializer::new(request.message_id.clone(), Arc::clone(&self.store))
                .with_clock(Arc::clone(&self.clock))
                .with_hooks(Arc::clone(&self.hooks))
                .with_retry_hooks(Arc::clone(&self.retry_hooks));
        if let Some(snapshots) = snapshots {
            materializer = materializer.with_snapshot_sender(snapshots);
        }

        let outcome = materializer
            .consume(stream, tool_results, &cancel, &self.policy.terminal)
            .await;

        let report = async {
            match &outcome {
                StreamOutcome::Completed => self.record(&key.id, true, None).await,
                StreamOutcome::Failed(message) => {
                    self.record(&key.id, false, Some(message.clone())).await
                }
                StreamOutcome::Cancelled => {}
            }
        };
        let (flushed, ()) = tokio::join!(
            materializer.persist_with_retry(&self.policy.flush_retry),
            report
        );

        let result = TurnResult {
            message_id: request.message_id,
            key_id: key.id,
            outcome,
            blocks: materializer.blocks().to_vec(),
            key_attempts: attempts,
        };

        if let Err(error) = flushed {
            tracing::warn!(
                provider_id = %request.provider_id,
                message_id = %result.message_id,
                key_id = %result.key_id,
                %error,
                blocks = result.blocks.len(),
                "turn blocks were not stored"
            );
            return Err(TurnError {
                error,
                unflushed: Some(UnflushedTurn {
                    result,
                    materializer,
                }),
            });
        }
        materializer.cleanup();

        tracing::info!(
            provider_id = %request.provider_id,
            message_id = %result.message_id,
            key_id = %result.key_id,
            outcome = result.outcome.label(),
            blocks = result.blocks.len(),
            "turn finished"
        );

        Ok(result)
    }

    async fn open_stream<'p>(
        &self,
        provider: &'p dyn ChatProvider,
        request: &TurnRequest,
    ) -> Result<OpenedStream<'p>, ChatError> {
        let max_attempts = self.policy.max_key_attempts.max(1);
        let mut tried: Vec<KeyId> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        while u32::try_from(tried.len()).unwrap_or(u32::MAX) < max_attempts {
            let selection = self
                .selector
                .select_key_excluding(&request.provider_id, request.strategy_override, &tried)
                .await?;
            let Some(key) = selection.key else {
                break;
            };
            tried.push(key.id.clone());

            let stream_request = StreamRequest::new(
                key.secret.clone(),
                request.model.clone(),
                request.history.clone(),
            );
            match provider.stream(stream_request).await {
                Ok(stream) => {
                    return Ok(OpenedStream {
                        key,
                        stream,
                        attempts: u32::try_from(tried.len()).unwrap_or(u32::MAX),
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        provider_id = %request.provider_id,
                        key_id = %key.id,
                        %error,
                        "failed to open provider stream"
                    );
                    self.record(&key.id, false, Some(error.to_string())).await;
                    let rotates = error.rotates_key();
                    last_error = Some(error);
                    if !rotates {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(error) => ChatError::from(error),
            None => ChatError::no_key_available(format!(
                "no eligible key for provider '{}'",
                request.provider_id
            )),
        })
    }

    async fn record(&self, key_id: &KeyId, success: bool, error_message: Option<String>) {
        if let Err(error) = self
            .selector
            .report_outcome(key_id, success, error_message)
            .await
        {
            tracing::warn!(%key_id, %error, "failed to record key outcome");
        }
    }
}

fn validate_request(request: &TurnRequest) -> Result<(), ChatError> {
    if request.model.trim().is_empty() {
        return Err(ChatError::invalid_request("model must not be empty"));
    }
    if request.history.is_empty() {
        return Err(ChatError::invalid_request(
            "at least one message is required",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use qcommon::{BoxFuture, ProviderId};
    use qprovider::{Message, Role, StreamChunk, VecChunkStream};
    use qstore::{ChatStore, InMemoryStore, KeyStore};

    use qstore::{BlockStatus, StoreError};
    use tokio::sync::watch;

    use super::*;
    use crate::BlockSnapshot;

    struct ScriptedProvider {
        opened_with: Mutex<Vec<String>>,
    }

    impl ChatProvider for ScriptedProvider {
        fn id(&self) -> ProviderId {
            ProviderId::from("openai")
        }

        fn stream<'a>(
            &'a self,
            request: StreamRequest,
        ) -> BoxFuture<'a, Result<ChunkStream<'a>, ProviderError>> {
            Box::pin(async move {
                let secret = request.secret.expose().to_string();
                if let Ok(mut opened) = self.opened_with.lock() {
                    opened.push(secret.clone());
                }
                match secret.as_str() {
                    "sk-revoked" => Err(ProviderError::authentication("key revoked")),
                    "sk-bad-model" => Err(ProviderError::invalid_request("unknown model")),
                    _ => {
                        let stream: ChunkStream<'a> = Box::pin(VecChunkStream::new(vec![
                            Ok(StreamChunk::TextDelta("ok".into())),
                            Ok(StreamChunk::Done),
                        ]));
                        Ok(stream)
                    }
                }
            })
        }
    }

    async fn runner(
        secrets: &[(&str, &str)],
    ) -> (Arc<InMemoryStore>, Arc<ScriptedProvider>, TurnRunner) {
        let store = Arc::new(InMemoryStore::new());
        for (id, secret) in secrets {
            store
                .insert_key(ApiKey::new(*id, "openai", *secret, std::time::SystemTime::now()))
                .await
                .expect("insert should work");
        }
        let provider = Arc::new(ScriptedProvider {
            opened_with: Mutex::new(Vec::new()),
        });
        let mut providers = ProviderRegistry::new();
        providers.register_arc(provider.clone());

        let chat_store: Arc<dyn ChatStore> = store.clone();
        let selector = Arc::new(KeySelector::new(chat_store.clone()));
        let runner = TurnRunner::new(selector, providers, chat_store);
        (store, provider, runner)
    }

    fn request() -> TurnRequest {
        TurnRequest::new("openai", "gpt-4o-mini", "m1", vec![Message::new(Role::User, "hi")])
            .with_strategy(qstore::SelectionStrategy::Priority)
    }

    #[tokio::test]
    async fn rejects_empty_history_and_unknown_provider() {
        let (_, _, runner) = runner(&[("k1", "sk-1")]).await;

        let empty = TurnRequest::new("openai", "gpt", "m1", Vec::new());
        let error = runner
            .run_turn(empty, TurnControls::new())
            .await
            .expect_err("empty history must fail");
        assert_eq!(error.kind(), ChatErrorKind::InvalidRequest);

        let unknown = TurnRequest::new("mistral", "m", "m1", vec![Message::new(Role::User, "hi")]);
        let error = runner
            .run_turn(unknown, TurnControls::new())
            .await
            .expect_err("unknown provider must fail");
        assert_eq!(error.kind(), ChatErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn non_rotating_open_error_stops_after_one_key() {
        let (store, provider, runner) = runner(&[("k1", "sk-bad-model"), ("k2", "sk-2")]).await;

        let error = runner
            .run_turn(request(), TurnControls::new())
            .await
            .expect_err("invalid request must surface");
        assert_eq!(error.kind(), ChatErrorKind::Provider);
        assert_eq!(
            provider.opened_with.lock().map(|opened| opened.len()).unwrap_or(0),
            1
        );

        let key = store
            .get_key(&KeyId::from("k1"))
            .await
            .expect("get should work")
            .expect("key exists");
        assert_eq!(key.usage.failed_requests, 1);
    }

    #[tokio::test]
    async fn rotation_is_bounded_by_max_key_attempts() {
        let (_, provider, runner) =
            runner(&[("k1", "sk-revoked"), ("k2", "sk-revoked"), ("k3", "sk-3")]).await;
        let runner = runner.with_policy(TurnPolicy {
            max_key_attempts: 2,
            ..TurnPolicy::default()
        });

        let error = runner
            .run_turn(request(), TurnControls::new())
            .await
            .expect_err("two revoked keys exhaust the attempts");
        assert_eq!(error.kind(), ChatErrorKind::Provider);
        assert_eq!(
            provider
                .opened_with
                .lock()
                .map(|opened| opened.clone())
                .unwrap_or_default(),
            vec!["sk-revoked".to_string(), "sk-revoked".to_string()]
        );
    }

    /// Keys come from memory; every block write fails.
    struct FullDisk {
        keys: InMemoryStore,
        attempts: Mutex<u32>,
    }

    impl BlockStore for FullDisk {
        fn replace_blocks<'a>(
            &'a self,
            _message_id: &'a qcommon::MessageId,
            _blocks: Vec<ContentBlock>,
        ) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(async move {
                if let Ok(mut attempts) = self.attempts.lock() {
                    *attempts += 1;
                }
                Err(StoreError::storage("disk full"))
            })
        }

        fn load_blocks<'a>(
            &'a self,
            message_id: &'a qcommon::MessageId,
        ) -> BoxFuture<'a, Result<Vec<ContentBlock>, StoreError>> {
            self.keys.load_blocks(message_id)
        }

        fn delete_blocks<'a>(
            &'a self,
            message_id: &'a qcommon::MessageId,
        ) -> BoxFuture<'a, Result<usize, StoreError>> {
            self.keys.delete_blocks(message_id)
        }
    }

    #[tokio::test]
    async fn failed_write_hands_blocks_back_and_keeps_snapshot() {
        let keys = Arc::new(InMemoryStore::new());
        keys.insert_key(ApiKey::new("k1", "openai", "sk-1", std::time::SystemTime::now()))
            .await
            .expect("insert should work");
        let disk = Arc::new(FullDisk {
            keys: InMemoryStore::new(),
            attempts: Mutex::new(0),
        });
        let mut providers = ProviderRegistry::new();
        providers.register(ScriptedProvider {
            opened_with: Mutex::new(Vec::new()),
        });
        let key_store: Arc<dyn ChatStore> = keys.clone();
        let runner = TurnRunner::new(
            Arc::new(KeySelector::new(key_store)),
            providers,
            disk.clone(),
        );

        let (sender, receiver) = watch::channel(BlockSnapshot::empty("m1".into()));
        let error = runner
            .run_turn(request(), TurnControls::new().with_snapshots(sender))
            .await
            .expect_err("write must fail");
        assert_eq!(error.kind(), ChatErrorKind::Store);

        let snapshot = receiver.borrow().clone();
        assert_eq!(snapshot.blocks.len(), 1);
        assert_eq!(snapshot.blocks[0].content, "ok");

        let mut unflushed = error.into_unflushed().expect("blocks should come back");
        assert_eq!(unflushed.result().outcome, StreamOutcome::Completed);
        assert_eq!(unflushed.blocks().len(), 1);
        assert_eq!(unflushed.blocks()[0].status, BlockStatus::Success);

        let retried = unflushed
            .retry_flush(&RetryPolicy::no_retry())
            .await
            .expect_err("disk is still full");
        assert_eq!(retried.kind, ChatErrorKind::Store);
        assert_eq!(*disk.attempts.lock().expect("attempts lock"), 2);

        let result = unflushed.finish();
        assert_eq!(result.blocks.len(), 1);
        assert!(receiver.borrow().blocks.is_empty());

        let key = keys
            .get_key(&KeyId::from("k1"))
            .await
            .expect("get should work")
            .expect("key exists");
        assert_eq!(key.usage.successful_requests, 1);
    }
}
