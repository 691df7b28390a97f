//! Small convenience constructors for common types.

use crate::{Message, MessageId, ProviderId, Role, SelectionStrategy, TurnRequest};

pub fn system_message(content: impl Into<String>) -> Message {
    Message::new(Role::System, content)
}

pub fn user_message(content: impl Into<String>) -> Message {
    Message::new(Role::User, content)
}

pub fn assistant_message(content: impl Into<String>) -> Message {
    Message::new(Role::Assistant, content)
}

pub fn tool_message(content: impl Into<String>) -> Message {
    Message::new(Role::Tool, content)
}

pub fn turn(
    provider_id: impl Into<ProviderId>,
    model: impl Into<String>,
    message_id: impl Into<MessageId>,
    history: Vec<Message>,
) -> TurnRequest {
    TurnRequest::new(provider_id, model, message_id, history)
}

/// Accepts the stored names plus the hyphenated and spaced spellings users type.
pub fn parse_strategy(value: &str) -> Option<SelectionStrategy> {
    SelectionStrategy::parse(&value.trim().replace(' ', "_"))
}
