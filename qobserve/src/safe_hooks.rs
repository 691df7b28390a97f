//! Wrappers that keep a panicking hook from unwinding into the request path.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use qchat::{BlockLifecycleHooks, StreamOutcome};
use qcommon::{KeyId, MessageId, ProviderId, RetryHooks, Retryable};
use qkeys::KeySelectionHooks;
use qstore::{ApiKey, ContentBlock, SelectionStrategy, StoreError};

fn guarded(call: impl FnOnce()) {
    let _ = catch_unwind(AssertUnwindSafe(call));
}

pub struct SafeRetryHooks<H> {
    inner: H,
}

impl<H> SafeRetryHooks<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H> RetryHooks for SafeRetryHooks<H>
where
    H: RetryHooks,
{
    fn on_attempt_start(&self, operation: &str, attempt: u32) {
        guarded(|| self.inner.on_attempt_start(operation, attempt));
    }

    fn on_retry_scheduled(
        &self,
        operation: &str,
        attempt: u32,
        delay: Duration,
        error: &dyn Retryable,
    ) {
        guarded(|| {
            self.inner
                .on_retry_scheduled(operation, attempt, delay, error)
        });
    }

    fn on_success(&self, operation: &str, attempts: u32) {
        guarded(|| self.inner.on_success(operation, attempts));
    }

    fn on_failure(&self, operation: &str, attempts: u32, error: &dyn Retryable) {
        guarded(|| self.inner.on_failure(operation, attempts, error));
    }
}

pub struct SafeKeySelectionHooks<H> {
    inner: H,
}

impl<H> SafeKeySelectionHooks<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H> KeySelectionHooks for SafeKeySelectionHooks<H>
where
    H: KeySelectionHooks,
{
    fn on_key_selected(
        &self,
        provider_id: &ProviderId,
        key_id: &KeyId,
        strategy: SelectionStrategy,
    ) {
        guarded(|| self.inner.on_key_selected(provider_id, key_id, strategy));
    }

    fn on_no_eligible_key(&self, provider_id: &ProviderId, total_keys: usize) {
        guarded(|| self.inner.on_no_eligible_key(provider_id, total_keys));
    }

    fn on_outcome_recorded(&self, key: &ApiKey, success: bool) {
        guarded(|| self.inner.on_outcome_recorded(key, success));
    }

    fn on_key_tripped(&self, key: &ApiKey) {
        guarded(|| self.inner.on_key_tripped(key));
    }

    fn on_key_recovered(&self, key: &ApiKey) {
        guarded(|| self.inner.on_key_recovered(key));
    }
}

pub struct SafeBlockLifecycleHooks<H> {
    inner: H,
}

impl<H> SafeBlockLifecycleHooks<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H> BlockLifecycleHooks for SafeBlockLifecycleHooks<H>
where
    H: BlockLifecycleHooks,
{
    fn on_block_added(&self, block: &ContentBlock) {
        guarded(|| self.inner.on_block_added(block));
    }

    fn on_block_updated(&self, block: &ContentBlock) {
        guarded(|| self.inner.on_block_updated(block));
    }

    fn on_unknown_tool_call(&self, message_id: &MessageId, tool_call_id: &str) {
        guarded(|| self.inner.on_unknown_tool_call(message_id, tool_call_id));
    }

    fn on_stream_finished(&self, message_id: &MessageId, outcome: &StreamOutcome) {
        guarded(|| self.inner.on_stream_finished(message_id, outcome));
    }

    fn on_persisted(&self, message_id: &MessageId, block_count: usize) {
        guarded(|| self.inner.on_persisted(message_id, block_count));
    }

    fn on_persist_failed(&self, message_id: &MessageId, error: &StoreError) {
        guarded(|| self.inner.on_persist_failed(message_id, error));
    }
}
