//! Streaming turn orchestration: provider chunks become ordered content
//! blocks, published live and written to the store once per message.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use qchat::{BlockMaterializer, BlockUpdate, NewBlock};
//! use qstore::{BlockStatus, InMemoryStore};
//!
//! let mut blocks = BlockMaterializer::new("m1", Arc::new(InMemoryStore::new()));
//! let text = blocks.add_block(NewBlock::text("Hello"));
//! blocks
//!     .update_block(&text.id, BlockUpdate::status(BlockStatus::Success))
//!     .expect("pending text can close");
//!
//! let tool = blocks.add_block(NewBlock::tool("call-1", "search", "{}"));
//! assert_eq!(tool.sort_order, 1);
//! assert_eq!(
//!     blocks.get_block_by_tool_call_id("call-1").map(|block| block.id.clone()),
//!     Some(tool.id)
//! );
//! ```

mod consumer;
mod error;
mod hooks;
mod materializer;
mod runner;
mod types;

pub use error::{ChatError, ChatErrorKind};
pub use hooks::{BlockLifecycleHooks, NoopBlockLifecycleHooks};
pub use materializer::BlockMaterializer;
pub use runner::{TurnError, TurnRunner, UnflushedTurn};
pub use types::{
    BlockSnapshot, BlockUpdate, INCOMPLETE_TOOL_MESSAGE, NewBlock, StreamOutcome,
    TerminalPolicy, ToolOutcome, ToolSettlement, TurnControls, TurnPolicy, TurnRequest,
    TurnResult,
};

pub mod prelude {
    pub use crate::{
        BlockLifecycleHooks, BlockMaterializer, BlockSnapshot, BlockUpdate, ChatError,
        ChatErrorKind, NewBlock, NoopBlockLifecycleHooks, StreamOutcome, TerminalPolicy,
        ToolOutcome, ToolSettlement, TurnControls, TurnError, TurnPolicy, TurnRequest,
        TurnResult, TurnRunner, UnflushedTurn,
    };
}
