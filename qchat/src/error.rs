//! Chat-layer errors and classification.

use std::error::Error;
use std::fmt::{Display, Formatter};

use qkeys::{KeyError, KeyErrorKind};
use qprovider::ProviderError;
use qstore::{StoreError, StoreErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorKind {
    InvalidRequest,
    NoKeyAvailable,
    Provider,
    Store,
    NotFound,
    InvalidTransition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    pub kind: ChatErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ChatErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::InvalidRequest, message)
    }

    pub fn no_key_available(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::NoKeyAvailable, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Provider, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Store, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::NotFound, message)
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::InvalidTransition, message)
    }
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for ChatError {}

impl From<ProviderError> for ChatError {
    fn from(value: ProviderError) -> Self {
        ChatError::provider(value.to_string())
    }
}

impl From<StoreError> for ChatError {
    fn from(value: StoreError) -> Self {
        match value.kind {
            StoreErrorKind::NotFound => ChatError::not_found(value.message),
            StoreErrorKind::InvalidRequest => ChatError::invalid_request(value.message),
            StoreErrorKind::Storage | StoreErrorKind::Busy | StoreErrorKind::Other => {
                ChatError::store(value.to_string())
            }
        }
    }
}

impl From<KeyError> for ChatError {
    fn from(value: KeyError) -> Self {
        match value.kind {
            KeyErrorKind::NotFound => ChatError::not_found(value.message),
            KeyErrorKind::InvalidRequest => ChatError::invalid_request(value.message),
            KeyErrorKind::Store => ChatError::store(value.message),
        }
    }
}
