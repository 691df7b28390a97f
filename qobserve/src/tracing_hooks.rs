//! Structured `tracing` events for every hook point.
//!
//! Events carry `phase` and `event` fields so one filter can follow a turn
//! across crates. Keys are identified by id and masked secret only.

use std::time::Duration;

use qchat::{BlockLifecycleHooks, StreamOutcome};
use qcommon::{KeyId, MessageId, ProviderId, RetryHooks, Retryable};
use qkeys::KeySelectionHooks;
use qstore::{ApiKey, ContentBlock, SelectionStrategy, StoreError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObservabilityHooks;

impl RetryHooks for TracingObservabilityHooks {
    fn on_attempt_start(&self, operation: &str, attempt: u32) {
        tracing::debug!(phase = "store", event = "attempt_start", operation, attempt);
    }

    fn on_retry_scheduled(
        &self,
        operation: &str,
        attempt: u32,
        delay: Duration,
        error: &dyn Retryable,
    ) {
        tracing::warn!(
            phase = "store",
            event = "retry_scheduled",
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error_kind = %error.kind_label(),
            error = %error
        );
    }

    fn on_success(&self, operation: &str, attempts: u32) {
        tracing::debug!(phase = "store", event = "success", operation, attempts);
    }

    fn on_failure(&self, operation: &str, attempts: u32, error: &dyn Retryable) {
        tracing::error!(
            phase = "store",
            event = "failure",
            operation,
            attempts,
            error_kind = %error.kind_label(),
            retryable = error.is_retryable(),
            error = %error
        );
    }
}

impl KeySelectionHooks for TracingObservabilityHooks {
    fn on_key_selected(
        &self,
        provider_id: &ProviderId,
        key_id: &KeyId,
        strategy: SelectionStrategy,
    ) {
        tracing::debug!(
            phase = "keys",
            event = "key_selected",
            provider_id = %provider_id,
            key_id = %key_id,
            strategy = strategy.as_str()
        );
    }

    fn on_no_eligible_key(&self, provider_id: &ProviderId, total_keys: usize) {
        tracing::warn!(
            phase = "keys",
            event = "no_eligible_key",
            provider_id = %provider_id,
            total_keys
        );
    }

    fn on_outcome_recorded(&self, key: &ApiKey, success: bool) {
        tracing::debug!(
            phase = "keys",
            event = "outcome_recorded",
            provider_id = %key.provider_id,
            key_id = %key.id,
            success,
            consecutive_failures = key.usage.consecutive_failures,
            status = key.status.as_str()
        );
    }

    fn on_key_tripped(&self, key: &ApiKey) {
        tracing::warn!(
            phase = "keys",
            event = "key_tripped",
            provider_id = %key.provider_id,
            key_id = %key.id,
            secret = %key.secret.masked(),
            consecutive_failures = key.usage.consecutive_failures,
            last_error = key.last_error.as_deref()
        );
    }

    fn on_key_recovered(&self, key: &ApiKey) {
        tracing::info!(
            phase = "keys",
            event = "key_recovered",
            provider_id = %key.provider_id,
            key_id = %key.id
        );
    }
}

impl BlockLifecycleHooks for TracingObservabilityHooks {
    fn on_block_added(&self, block: &ContentBlock) {
        tracing::trace!(
            phase = "blocks",
            event = "block_added",
            message_id = %block.message_id,
            block_id = %block.id,
            block_type = block.block_type.as_str(),
            sort_order = block.sort_order,
            tool_call_id = block.tool_call_id.as_deref()
        );
    }

    fn on_block_updated(&self, block: &ContentBlock) {
        tracing::trace!(
            phase = "blocks",
            event = "block_updated",
            message_id = %block.message_id,
            block_id = %block.id,
            status = block.status.as_str()
        );
    }

    fn on_unknown_tool_call(&self, message_id: &MessageId, tool_call_id: &str) {
        tracing::warn!(
            phase = "blocks",
            event = "unknown_tool_call",
            message_id = %message_id,
            tool_call_id
        );
    }

    fn on_stream_finished(&self, message_id: &MessageId, outcome: &StreamOutcome) {
        match outcome {
            StreamOutcome::Failed(reason) => tracing::warn!(
                phase = "blocks",
                event = "stream_finished",
                message_id = %message_id,
                outcome = outcome.label(),
                reason = reason.as_str()
            ),
            _ => tracing::info!(
                phase = "blocks",
                event = "stream_finished",
                message_id = %message_id,
                outcome = outcome.label()
            ),
        }
    }

    fn on_persisted(&self, message_id: &MessageId, block_count: usize) {
        tracing::info!(
            phase = "blocks",
            event = "persisted",
            message_id = %message_id,
            block_count
        );
    }

    fn on_persist_failed(&self, message_id: &MessageId, error: &StoreError) {
        tracing::error!(
            phase = "blocks",
            event = "persist_failed",
            message_id = %message_id,
            error_kind = ?error.kind,
            error = %error
        );
    }
}
