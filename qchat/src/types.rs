//! Request, result, and block-operation types for the chat layer.

use std::sync::Arc;

use qcommon::{KeyId, MessageId, ProviderId, RetryPolicy};
use qprovider::Message;
use qstore::{BlockStatus, BlockType, ContentBlock, SelectionStrategy};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub const INCOMPLETE_TOOL_MESSAGE: &str = "tool call did not complete";

/// Input for [`crate::BlockMaterializer::add_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub block_type: BlockType,
    pub status: BlockStatus,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_args: Option<String>,
}

impl NewBlock {
    /// A pending text block.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            block_type: BlockType::Text,
            status: BlockStatus::Pending,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_args: None,
        }
    }

    /// A pending tool block with empty content.
    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_args: impl Into<String>,
    ) -> Self {
        Self {
            block_type: BlockType::Tool,
            status: BlockStatus::Pending,
            content: String::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            tool_args: Some(tool_args.into()),
        }
    }

    pub fn with_status(mut self, status: BlockStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockUpdate {
    pub content: Option<String>,
    pub status: Option<BlockStatus>,
}

impl BlockUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            status: None,
        }
    }

    pub fn status(status: BlockStatus) -> Self {
        Self {
            content: None,
            status: Some(status),
        }
    }

    pub fn with_status(mut self, status: BlockStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Immutable view of a message's blocks, shared with any number of observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub message_id: MessageId,
    pub blocks: Arc<[ContentBlock]>,
}

impl BlockSnapshot {
    pub fn empty(message_id: MessageId) -> Self {
        Self {
            message_id,
            blocks: Arc::from(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// How pending blocks are closed when a stream ends.
///
/// Text blocks always become `Success` so partial output survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalPolicy {
    pub pending_tool_status: BlockStatus,
    pub incomplete_tool_message: String,
}

impl Default for TerminalPolicy {
    fn default() -> Self {
        Self {
            pending_tool_status: BlockStatus::Error,
            incomplete_tool_message: INCOMPLETE_TOOL_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSettlement {
    Success(String),
    Error(String),
}

impl ToolSettlement {
    pub fn status(&self) -> BlockStatus {
        match self {
            Self::Success(_) => BlockStatus::Success,
            Self::Error(_) => BlockStatus::Error,
        }
    }

    pub fn into_content(self) -> String {
        match self {
            Self::Success(content) | Self::Error(content) => content,
        }
    }
}

/// Result reported by the external tool engine for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    pub result: Result<String, String>,
}

impl ToolOutcome {
    pub fn success(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: Ok(output.into()),
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: Err(message.into()),
        }
    }

    pub fn settlement(self) -> (String, ToolSettlement) {
        let settlement = match self.result {
            Ok(output) => ToolSettlement::Success(output),
            Err(message) => ToolSettlement::Error(message),
        };
        (self.tool_call_id, settlement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl StreamOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnPolicy {
    /// Keys tried when opening the stream fails with a rotating error.
    pub max_key_attempts: u32,
    pub flush_retry: RetryPolicy,
    pub terminal: TerminalPolicy,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            max_key_attempts: 3,
            flush_retry: RetryPolicy::default(),
            terminal: TerminalPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub provider_id: ProviderId,
    pub model: String,
    pub message_id: MessageId,
    pub history: Vec<Message>,
    pub strategy_override: Option<SelectionStrategy>,
}

impl TurnRequest {
    pub fn new(
        provider_id: impl Into<ProviderId>,
        model: impl Into<String>,
        message_id: impl Into<MessageId>,
        history: Vec<Message>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model: model.into(),
            message_id: message_id.into(),
            history,
            strategy_override: None,
        }
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy_override = Some(strategy);
        self
    }
}

/// Per-turn inputs owned by the caller: cancellation, tool results, and an
/// optional snapshot channel for live rendering.
#[derive(Debug, Default)]
pub struct TurnControls {
    pub cancel: CancellationToken,
    pub tool_results: Option<mpsc::Receiver<ToolOutcome>>,
    pub snapshots: Option<watch::Sender<BlockSnapshot>>,
}

impl TurnControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tool_results(mut self, tool_results: mpsc::Receiver<ToolOutcome>) -> Self {
        self.tool_results = Some(tool_results);
        self
    }

    pub fn with_snapshots(mut self, snapshots: watch::Sender<BlockSnapshot>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    pub message_id: MessageId,
    pub key_id: KeyId,
    pub outcome: StreamOutcome,
    pub blocks: Vec<ContentBlock>,
    /// Keys tried, including the one that produced the stream.
    pub key_attempts: u32,
}
