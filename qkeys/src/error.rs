use std::error::Error;
use std::fmt::{Display, Formatter};

use qstore::{StoreError, StoreErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyErrorKind {
    Store,
    NotFound,
    InvalidRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    pub kind: KeyErrorKind,
    pub message: String,
}

impl KeyError {
    pub fn new(kind: KeyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(KeyErrorKind::Store, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(KeyErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(KeyErrorKind::InvalidRequest, message)
    }
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for KeyError {}

impl From<StoreError> for KeyError {
    fn from(value: StoreError) -> Self {
        let kind = match value.kind {
            StoreErrorKind::NotFound => KeyErrorKind::NotFound,
            StoreErrorKind::InvalidRequest => KeyErrorKind::InvalidRequest,
            StoreErrorKind::Storage | StoreErrorKind::Busy | StoreErrorKind::Other => {
                KeyErrorKind::Store
            }
        };

        Self::new(kind, value.message)
    }
}
