//! In-memory block assembly for one streaming message.
//!
//! Blocks are built and mutated in memory while chunks arrive, published to
//! observers as immutable snapshots after every change, and written to the
//! store once when the message is finished. The write is guarded by a
//! `persisted` flag, so repeated flush requests from racing completion paths
//! produce a single store write.

use std::collections::HashMap;
use std::sync::Arc;

use qcommon::{
    BlockId, Clock, MessageId, NoopRetryHooks, RetryHooks, RetryPolicy, SystemClock,
    execute_with_retry,
};
use qstore::{BlockStatus, BlockStore, BlockType, ContentBlock};
use tokio::sync::watch;

use crate::{
    BlockLifecycleHooks, BlockSnapshot, BlockUpdate, ChatError, NewBlock,
    NoopBlockLifecycleHooks, TerminalPolicy, ToolSettlement,
};

pub struct BlockMaterializer {
    message_id: MessageId,
    store: Arc<dyn BlockStore>,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn BlockLifecycleHooks>,
    retry_hooks: Arc<dyn RetryHooks>,
    blocks: Vec<ContentBlock>,
    positions: HashMap<BlockId, usize>,
    tool_calls: HashMap<String, BlockId>,
    persisted: bool,
    snapshots: watch::Sender<BlockSnapshot>,
}

impl BlockMaterializer {
    pub fn new(message_id: impl Into<MessageId>, store: Arc<dyn BlockStore>) -> Self {
        let message_id = message_id.into();
        let (snapshots, _) = watch::channel(BlockSnapshot::empty(message_id.clone()));
        Self {
            message_id,
            store,
            clock: Arc::new(SystemClock),
            hooks: Arc::new(NoopBlockLifecycleHooks),
            retry_hooks: Arc::new(NoopRetryHooks),
            blocks: Vec::new(),
            positions: HashMap::new(),
            tool_calls: HashMap::new(),
            persisted: false,
            snapshots,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
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

    /// Publishes snapshots on a caller-owned channel instead of a private one.
    pub fn with_snapshot_sender(mut self, sender: watch::Sender<BlockSnapshot>) -> Self {
        self.snapshots = sender;
        self.publish();
        self
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub(crate) fn hooks(&self) -> &dyn BlockLifecycleHooks {
        self.hooks.as_ref()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn subscribe(&self) -> watch::Receiver<BlockSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            message_id: self.message_id.clone(),
            blocks: Arc::from(self.blocks.as_slice()),
        }
    }

    pub fn add_block(&mut self, block: NewBlock) -> ContentBlock {
        let now = self.clock.now();
        let sort_order = u32::try_from(self.blocks.len()).unwrap_or(u32::MAX);
        let block = ContentBlock {
            id: BlockId::new(uuid::Uuid::new_v4().to_string()),
            message_id: self.message_id.clone(),
            block_type: block.block_type,
            status: block.status,
            content: block.content,
            sort_order,
            tool_call_id: block.tool_call_id,
            tool_name: block.tool_name,
            tool_args: block.tool_args,
            created_at: now,
            updated_at: now,
        };

        if block.block_type == BlockType::Tool
            && let Some(tool_call_id) = &block.tool_call_id
        {
            self.tool_calls.insert(tool_call_id.clone(), block.id.clone());
        }
        self.positions.insert(block.id.clone(), self.blocks.len());
        self.blocks.push(block.clone());

        self.hooks.on_block_added(&block);
        self.publish();
        block
    }

    /// Mutates a block in place. Nothing is written to the store.
    pub fn update_block(
        &mut self,
        block_id: &BlockId,
        update: BlockUpdate,
    ) -> Result<ContentBlock, ChatError> {
        let now = self.clock.now();
        let block = self.block_mut(block_id)?;
        check_transition(block, update.status)?;

        if let Some(content) = update.content {
            block.content = content;
        }
        if let Some(status) = update.status {
            block.status = status;
        }
        block.updated_at = now;

        let block = block.clone();
        self.hooks.on_block_updated(&block);
        self.publish();
        Ok(block)
    }

    /// Appends streamed text to a pending block without copying its content.
    pub fn append_to_block(&mut self, block_id: &BlockId, delta: &str) -> Result<(), ChatError> {
        let now = self.clock.now();
        let block = self.block_mut(block_id)?;
        if block.status.is_terminal() {
            return Err(ChatError::invalid_transition(format!(
                "block '{block_id}' is {} and cannot grow",
                block.status.as_str()
            )));
        }

        block.content.push_str(delta);
        block.updated_at = now;
        self.publish();
        Ok(())
    }

    pub fn get_block_by_tool_call_id(&self, tool_call_id: &str) -> Option<&ContentBlock> {
        let block_id = self.tool_calls.get(tool_call_id)?;
        let position = self.positions.get(block_id)?;
        self.blocks.get(*position)
    }

    /// Applies an out-of-band tool result. `Ok(None)` when the id is unknown.
    pub fn settle_tool_call(
        &mut self,
        tool_call_id: &str,
        settlement: ToolSettlement,
    ) -> Result<Option<ContentBlock>, ChatError> {
        let Some(block_id) = self.tool_calls.get(tool_call_id).cloned() else {
            self.hooks
                .on_unknown_tool_call(&self.message_id, tool_call_id);
            return Ok(None);
        };

        let status = settlement.status();
        let update = BlockUpdate::content(settlement.into_content()).with_status(status);
        self.update_block(&block_id, update).map(Some)
    }

    /// Closes every pending block. Returns how many blocks changed.
    pub fn finalize_pending(&mut self, policy: &TerminalPolicy) -> usize {
        let now = self.clock.now();
        let tool_status = match policy.pending_tool_status {
            BlockStatus::Pending => BlockStatus::Error,
            status => status,
        };

        let mut changed = Vec::new();
        for block in self.blocks.iter_mut() {
            if block.status != BlockStatus::Pending {
                continue;
            }

            match block.block_type {
                BlockType::Text => block.status = BlockStatus::Success,
                BlockType::Tool => {
                    block.status = tool_status;
                    if block.content.is_empty() {
                        block.content = policy.incomplete_tool_message.clone();
                    }
                }
            }
            block.updated_at = now;
            changed.push(block.clone());
        }

        if !changed.is_empty() {
            for block in &changed {
                self.hooks.on_block_updated(block);
            }
            self.publish();
        }
        changed.len()
    }

    /// Writes every block to the store in one transaction, at most once.
    ///
    /// Returns `Ok(true)` when this call performed the write and `Ok(false)`
    /// when an earlier call already did. A failed write leaves the message
    /// unpersisted so the caller can try again.
    pub async fn persist_to_repository(&mut self) -> Result<bool, ChatError> {
        self.flush(&RetryPolicy::no_retry()).await
    }

    /// [`Self::persist_to_repository`] with bounded retry of transient store errors.
    pub async fn persist_with_retry(&mut self, policy: &RetryPolicy) -> Result<bool, ChatError> {
        self.flush(policy).await
    }

    async fn flush(&mut self, policy: &RetryPolicy) -> Result<bool, ChatError> {
        if self.persisted {
            return Ok(false);
        }

        let store = &self.store;
        let message_id = &self.message_id;
        let blocks = &self.blocks;
        let result = execute_with_retry(
            "materializer.persist",
            policy,
            self.retry_hooks.as_ref(),
            move |_| store.replace_blocks(message_id, blocks.clone()),
            tokio::time::sleep,
        )
        .await;

        match result {
            Ok(()) => {
                self.persisted = true;
                self.hooks.on_persisted(&self.message_id, self.blocks.len());
                Ok(true)
            }
            Err(error) => {
                self.hooks.on_persist_failed(&self.message_id, &error);
                Err(ChatError::from(error))
            }
        }
    }

    /// Drops the in-memory blocks and the tool-call index and publishes an
    /// empty snapshot. Safe to call more than once.
    pub fn cleanup(&mut self) {
        self.tool_calls.clear();
        self.positions.clear();
        self.blocks.clear();
        self.publish();
    }

    fn block_mut(&mut self, block_id: &BlockId) -> Result<&mut ContentBlock, ChatError> {
        let position = *self.positions.get(block_id).ok_or_else(|| {
            ChatError::not_found(format!(
                "block '{block_id}' not found in message '{}'",
                self.message_id
            ))
        })?;
        self.blocks
            .get_mut(position)
            .ok_or_else(|| ChatError::not_found(format!("block '{block_id}' not found")))
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshots.send_replace(snapshot);
    }
}

fn check_transition(block: &ContentBlock, next: Option<BlockStatus>) -> Result<(), ChatError> {
    if block.block_type == BlockType::Tool && block.status.is_terminal() {
        return Err(ChatError::invalid_transition(format!(
            "tool block '{}' is already {}",
            block.id,
            block.status.as_str()
        )));
    }

    match (block.block_type, block.status, next) {
        (_, BlockStatus::Pending, Some(BlockStatus::Pending)) | (_, _, None) => Ok(()),
        (_, _, Some(BlockStatus::Pending)) => Err(ChatError::invalid_transition(format!(
            "block '{}' cannot return to pending",
            block.id
        ))),
        (BlockType::Text, _, Some(BlockStatus::Error)) => Err(ChatError::invalid_transition(
            format!("text block '{}' cannot be marked error", block.id),
        )),
        _ => Ok(()),
    }
}
