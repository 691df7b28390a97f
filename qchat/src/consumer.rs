//! Translation of provider stream chunks into block operations.

use futures_util::StreamExt;
use qprovider::{ChunkStream, StreamChunk};
use qstore::{BlockStatus, BlockType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    BlockMaterializer, BlockUpdate, NewBlock, StreamOutcome, TerminalPolicy, ToolOutcome,
    ToolSettlement,
};

impl BlockMaterializer {
    /// Drives one provider stream to its end.
    ///
    /// Tool results arriving on `tool_results` are applied between chunks.
    /// Cancellation wins over pending input. Whatever the outcome, every
    /// block is terminal when this returns.
    pub async fn consume(
        &mut self,
        mut stream: ChunkStream<'_>,
        tool_results: Option<mpsc::Receiver<ToolOutcome>>,
        cancel: &CancellationToken,
        policy: &TerminalPolicy,
    ) -> StreamOutcome {
        let mut tool_results = tool_results;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break StreamOutcome::Cancelled,
                received = next_tool_outcome(&mut tool_results), if tool_results.is_some() => {
                    match received {
                        Some(outcome) => {
                            let (tool_call_id, settlement) = outcome.settlement();
                            self.apply_settlement(&tool_call_id, settlement);
                        }
                        None => tool_results = None,
                    }
                }
                chunk = stream.next() => match chunk {
                    None => break StreamOutcome::Completed,
                    Some(Err(error)) => break StreamOutcome::Failed(error.to_string()),
                    Some(Ok(chunk)) => {
                        if let Some(outcome) = self.apply_chunk(chunk) {
                            break outcome;
                        }
                    }
                },
            }
        };

        drop(stream);
        self.finalize_pending(policy);
        tracing::debug!(
            message_id = %self.message_id(),
            outcome = outcome.label(),
            blocks = self.blocks().len(),
            "stream consumed"
        );
        self.hooks().on_stream_finished(self.message_id(), &outcome);
        outcome
    }

    /// Applies one chunk; returns the outcome when the chunk ends the stream.
    fn apply_chunk(&mut self, chunk: StreamChunk) -> Option<StreamOutcome> {
        match chunk {
            StreamChunk::TextDelta(delta) => {
                self.apply_text_delta(&delta);
                None
            }
            StreamChunk::ToolCallStart { id, name, args } => {
                self.close_open_text();
                if self.get_block_by_tool_call_id(&id).is_some() {
                    tracing::warn!(
                        message_id = %self.message_id(),
                        tool_call_id = %id,
                        "duplicate tool call start ignored"
                    );
                } else {
                    self.add_block(NewBlock::tool(id, name, args));
                }
                None
            }
            StreamChunk::ToolCallResult { id, content } => {
                self.apply_settlement(&id, ToolSettlement::Success(content));
                None
            }
            StreamChunk::ToolCallError { id, message } => {
                self.apply_settlement(&id, ToolSettlement::Error(message));
                None
            }
            StreamChunk::Done => Some(StreamOutcome::Completed),
            StreamChunk::Error(message) => Some(StreamOutcome::Failed(message)),
        }
    }

    fn apply_text_delta(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }

        let open = self.open_text_block();
        let appended = open.is_some_and(|block_id| self.append_to_block(&block_id, delta).is_ok());
        if !appended {
            self.add_block(NewBlock::text(delta));
        }
    }

    fn close_open_text(&mut self) {
        let Some(block_id) = self.open_text_block() else {
            return;
        };
        if let Err(error) = self.update_block(&block_id, BlockUpdate::status(BlockStatus::Success)) {
            tracing::warn!(message_id = %self.message_id(), %error, "failed to close text block");
        }
    }

    fn open_text_block(&self) -> Option<qcommon::BlockId> {
        self.blocks()
            .last()
            .filter(|block| {
                block.block_type == BlockType::Text && block.status == BlockStatus::Pending
            })
            .map(|block| block.id.clone())
    }

    fn apply_settlement(&mut self, tool_call_id: &str, settlement: ToolSettlement) {
        match self.settle_tool_call(tool_call_id, settlement) {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                message_id = %self.message_id(),
                tool_call_id,
                "result for unknown tool call skipped"
            ),
            Err(error) => tracing::warn!(
                message_id = %self.message_id(),
                tool_call_id,
                %error,
                "tool result rejected"
            ),
        }
    }
}

async fn next_tool_outcome(
    receiver: &mut Option<mpsc::Receiver<ToolOutcome>>,
) -> Option<ToolOutcome> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
