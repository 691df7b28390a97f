use qcommon::MessageId;
use qstore::{ContentBlock, StoreError};

use crate::StreamOutcome;

/// Observation points for block materialization.
///
/// Snapshots are the UI channel; these hooks are for logs and metrics.
pub trait BlockLifecycleHooks: Send + Sync {
    fn on_block_added(&self, _block: &ContentBlock) {}

    fn on_block_updated(&self, _block: &ContentBlock) {}

    fn on_unknown_tool_call(&self, _message_id: &MessageId, _tool_call_id: &str) {}

    fn on_stream_finished(&self, _message_id: &MessageId, _outcome: &StreamOutcome) {}

    fn on_persisted(&self, _message_id: &MessageId, _block_count: usize) {}

    fn on_persist_failed(&self, _message_id: &MessageId, _error: &StoreError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBlockLifecycleHooks;

impl BlockLifecycleHooks for NoopBlockLifecycleHooks {}
