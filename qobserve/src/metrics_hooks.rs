//! `metrics` counters and histograms for every hook point.
//!
//! ```rust
//! use qkeys::KeySelectionHooks;
//! use qobserve::MetricsObservabilityHooks;
//!
//! fn accepts_selection_hooks(_hooks: &dyn KeySelectionHooks) {}
//!
//! accepts_selection_hooks(&MetricsObservabilityHooks);
//! ```

use std::time::Duration;

use qchat::{BlockLifecycleHooks, StreamOutcome};
use qcommon::{KeyId, MessageId, ProviderId, RetryHooks, Retryable};
use qkeys::KeySelectionHooks;
use qstore::{ApiKey, ContentBlock, SelectionStrategy, StoreError};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObservabilityHooks;

impl RetryHooks for MetricsObservabilityHooks {
    fn on_attempt_start(&self, operation: &str, _attempt: u32) {
        metrics::counter!(
            "quill_store_attempt_start_total",
            "operation" => operation.to_string()
        )
        .increment(1);
    }

    fn on_retry_scheduled(
        &self,
        operation: &str,
        _attempt: u32,
        delay: Duration,
        error: &dyn Retryable,
    ) {
        metrics::counter!(
            "quill_store_retry_scheduled_total",
            "operation" => operation.to_string(),
            "error_kind" => error.kind_label()
        )
        .increment(1);
        metrics::histogram!(
            "quill_store_retry_delay_seconds",
            "operation" => operation.to_string()
        )
        .record(delay.as_secs_f64());
    }

    fn on_success(&self, operation: &str, attempts: u32) {
        metrics::histogram!(
            "quill_store_attempts_per_success",
            "operation" => operation.to_string()
        )
        .record(f64::from(attempts));
    }

    fn on_failure(&self, operation: &str, _attempts: u32, error: &dyn Retryable) {
        metrics::counter!(
            "quill_store_failure_total",
            "operation" => operation.to_string(),
            "error_kind" => error.kind_label()
        )
        .increment(1);
    }
}

impl KeySelectionHooks for MetricsObservabilityHooks {
    fn on_key_selected(
        &self,
        provider_id: &ProviderId,
        _key_id: &KeyId,
        strategy: SelectionStrategy,
    ) {
        metrics::counter!(
            "quill_key_selected_total",
            "provider" => provider_id.to_string(),
            "strategy" => strategy.as_str()
        )
        .increment(1);
    }

    fn on_no_eligible_key(&self, provider_id: &ProviderId, _total_keys: usize) {
        metrics::counter!(
            "quill_key_unavailable_total",
            "provider" => provider_id.to_string()
        )
        .increment(1);
    }

    fn on_outcome_recorded(&self, key: &ApiKey, success: bool) {
        metrics::counter!(
            "quill_key_outcome_total",
            "provider" => key.provider_id.to_string(),
            "result" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    fn on_key_tripped(&self, key: &ApiKey) {
        metrics::counter!(
            "quill_key_tripped_total",
            "provider" => key.provider_id.to_string()
        )
        .increment(1);
    }

    fn on_key_recovered(&self, key: &ApiKey) {
        metrics::counter!(
            "quill_key_recovered_total",
            "provider" => key.provider_id.to_string()
        )
        .increment(1);
    }
}

impl BlockLifecycleHooks for MetricsObservabilityHooks {
    fn on_block_added(&self, block: &ContentBlock) {
        metrics::counter!(
            "quill_block_added_total",
            "block_type" => block.block_type.as_str()
        )
        .increment(1);
    }

    fn on_unknown_tool_call(&self, _message_id: &MessageId, _tool_call_id: &str) {
        metrics::counter!("quill_block_unknown_tool_call_total").increment(1);
    }

    fn on_stream_finished(&self, _message_id: &MessageId, outcome: &StreamOutcome) {
        metrics::counter!(
            "quill_stream_finished_total",
            "outcome" => outcome.label()
        )
        .increment(1);
    }

    fn on_persisted(&self, _message_id: &MessageId, block_count: usize) {
        metrics::counter!("quill_block_persist_total", "status" => "success").increment(1);
        metrics::histogram!("quill_blocks_per_message").record(block_count as f64);
    }

    fn on_persist_failed(&self, _message_id: &MessageId, error: &StoreError) {
        metrics::counter!(
            "quill_block_persist_total",
            "status" => "failure",
            "error_kind" => error.kind_label()
        )
        .increment(1);
    }
}
