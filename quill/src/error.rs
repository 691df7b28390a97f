use std::error::Error;
use std::fmt::{Display, Formatter};

use qkeys::KeyError;
use qstore::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuillErrorKind {
    Config,
    Store,
    Keys,
    Tracing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuillError {
    pub kind: QuillErrorKind,
    pub message: String,
}

impl QuillError {
    pub fn new(kind: QuillErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(QuillErrorKind::Config, message)
    }

    pub fn tracing(message: impl Into<String>) -> Self {
        Self::new(QuillErrorKind::Tracing, message)
    }
}

impl Display for QuillError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for QuillError {}

impl From<StoreError> for QuillError {
    fn from(value: StoreError) -> Self {
        Self::new(QuillErrorKind::Store, value.to_string())
    }
}

impl From<KeyError> for QuillError {
    fn from(value: KeyError) -> Self {
        Self::new(QuillErrorKind::Keys, value.to_string())
    }
}
