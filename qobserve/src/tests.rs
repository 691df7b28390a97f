use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use qchat::{BlockLifecycleHooks, BlockMaterializer, NewBlock, StreamOutcome};
use qcommon::{KeyId, MessageId, ProviderId, RetryHooks};
use qkeys::KeySelectionHooks;
use qstore::{ApiKey, InMemoryStore, KeyStatus, SelectionStrategy, StoreError};

use crate::{
    MetricsObservabilityHooks, SafeBlockLifecycleHooks, SafeKeySelectionHooks, SafeRetryHooks,
    TracingObservabilityHooks,
};

fn tripped_key() -> ApiKey {
    let mut key = ApiKey::new("k1", "openai", "sk-live-abcdefgh1234", UNIX_EPOCH);
    key.status = KeyStatus::Error;
    key.usage.consecutive_failures = 3;
    key.last_error = Some("429 rate limited".into());
    key
}

fn sample_block() -> qstore::ContentBlock {
    let mut blocks = BlockMaterializer::new("m1", Arc::new(InMemoryStore::new()));
    blocks.add_block(NewBlock::tool("call-1", "search", "{}"))
}

fn exercise_all(
    retry: &dyn RetryHooks,
    keys: &dyn KeySelectionHooks,
    blocks: &dyn BlockLifecycleHooks,
) {
    let busy = StoreError::busy("database is locked");
    let provider = ProviderId::from("openai");
    let message = MessageId::from("m1");
    let key = tripped_key();
    let block = sample_block();

    retry.on_attempt_start("materializer.persist", 1);
    retry.on_retry_scheduled("materializer.persist", 1, Duration::from_millis(50), &busy);
    retry.on_success("materializer.persist", 2);
    retry.on_failure("materializer.persist", 3, &busy);

    keys.on_key_selected(&provider, &KeyId::from("k1"), SelectionStrategy::RoundRobin);
    keys.on_no_eligible_key(&provider, 2);
    keys.on_outcome_recorded(&key, false);
    keys.on_key_tripped(&key);
    keys.on_key_recovered(&key);

    blocks.on_block_added(&block);
    blocks.on_block_updated(&block);
    blocks.on_unknown_tool_call(&message, "ghost");
    blocks.on_stream_finished(&message, &StreamOutcome::Completed);
    blocks.on_stream_finished(&message, &StreamOutcome::Failed("overloaded".into()));
    blocks.on_persisted(&message, 2);
    blocks.on_persist_failed(&message, &busy);
}

#[test]
fn tracing_hooks_smoke_test_all_callbacks() {
    let hooks = TracingObservabilityHooks;
    exercise_all(&hooks, &hooks, &hooks);
}

#[test]
fn metrics_hooks_smoke_test_all_callbacks() {
    let hooks = MetricsObservabilityHooks;
    exercise_all(&hooks, &hooks, &hooks);
}

#[derive(Default)]
struct RecordingHooks {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingHooks {
    fn push(&self, event: &'static str) {
        self.events
            .lock()
            .expect("events lock should not be poisoned")
            .push(event);
    }
}

impl RetryHooks for RecordingHooks {
    fn on_attempt_start(&self, _operation: &str, _attempt: u32) {
        self.push("attempt_start");
    }

    fn on_success(&self, _operation: &str, _attempts: u32) {
        self.push("success");
    }
}

impl KeySelectionHooks for RecordingHooks {
    fn on_key_selected(
        &self,
        _provider_id: &ProviderId,
        _key_id: &KeyId,
        _strategy: SelectionStrategy,
    ) {
        self.push("key_selected");
    }

    fn on_key_tripped(&self, _key: &ApiKey) {
        self.push("key_tripped");
    }
}

impl BlockLifecycleHooks for RecordingHooks {
    fn on_block_added(&self, _block: &qstore::ContentBlock) {
        self.push("block_added");
    }

    fn on_persisted(&self, _message_id: &MessageId, _block_count: usize) {
        self.push("persisted");
    }
}

struct PanicHooks;

impl RetryHooks for PanicHooks {
    fn on_attempt_start(&self, _operation: &str, _attempt: u32) {
        panic!("attempt_start panic");
    }

    fn on_failure(&self, _operation: &str, _attempts: u32, _error: &dyn qcommon::Retryable) {
        panic!("failure panic");
    }
}

impl KeySelectionHooks for PanicHooks {
    fn on_key_selected(
        &self,
        _provider_id: &ProviderId,
        _key_id: &KeyId,
        _strategy: SelectionStrategy,
    ) {
        panic!("key_selected panic");
    }

    fn on_key_tripped(&self, _key: &ApiKey) {
        panic!("key_tripped panic");
    }
}

impl BlockLifecycleHooks for PanicHooks {
    fn on_block_added(&self, _block: &qstore::ContentBlock) {
        panic!("block_added panic");
    }

    fn on_block_updated(&self, _block: &qstore::ContentBlock) {
        panic!("block_updated panic");
    }
}

#[test]
fn safe_hooks_delegate_when_inner_succeeds() {
    let inner = RecordingHooks::default();
    let events = Arc::clone(&inner.events);
    let retry = SafeRetryHooks::new(inner);
    retry.on_attempt_start("store.increment_usage", 1);
    retry.on_success("store.increment_usage", 1);

    let keys = SafeKeySelectionHooks::new(RecordingHooks {
        events: Arc::clone(&events),
    });
    keys.on_key_selected(
        &ProviderId::from("openai"),
        &KeyId::from("k1"),
        SelectionStrategy::Priority,
    );
    keys.on_key_tripped(&tripped_key());

    let blocks = SafeBlockLifecycleHooks::new(RecordingHooks {
        events: Arc::clone(&events),
    });
    blocks.on_block_added(&sample_block());
    blocks.on_persisted(&MessageId::from("m1"), 1);

    assert_eq!(
        *events.lock().expect("events lock should not be poisoned"),
        vec![
            "attempt_start",
            "success",
            "key_selected",
            "key_tripped",
            "block_added",
            "persisted",
        ]
    );
}

#[test]
fn safe_hooks_swallow_panics() {
    let retry = SafeRetryHooks::new(PanicHooks);
    let keys = SafeKeySelectionHooks::new(PanicHooks);
    let blocks = SafeBlockLifecycleHooks::new(PanicHooks);

    exercise_all(&retry, &keys, &blocks);
}

#[test]
fn materializer_keeps_working_behind_panicking_hooks() {
    let mut blocks = BlockMaterializer::new("m1", Arc::new(InMemoryStore::new()))
        .with_hooks(Arc::new(SafeBlockLifecycleHooks::new(PanicHooks)));

    let first = blocks.add_block(NewBlock::text("Hi"));
    let second = blocks.add_block(NewBlock::tool("call-1", "search", "{}"));

    assert_eq!(first.sort_order, 0);
    assert_eq!(second.sort_order, 1);
    assert!(blocks.get_block_by_tool_call_id("call-1").is_some());
}
