//! Provider-agnostic request types.

use qcommon::SecretString;

use crate::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One streaming call made with a specific API key.
///
/// The secret is carried as a [`SecretString`], so logging the request with
/// `{:?}` never reveals it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub secret: SecretString,
    pub model: String,
    pub history: Vec<Message>,
}

impl StreamRequest {
    pub fn new(secret: SecretString, model: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            secret,
            model: model.into(),
            history,
        }
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.secret.is_empty() {
            return Err(ProviderError::authentication("api key secret must not be empty"));
        }

        if self.model.trim().is_empty() {
            return Err(ProviderError::invalid_request("model must not be empty"));
        }

        if self.history.is_empty() {
            return Err(ProviderError::invalid_request(
                "at least one message is required",
            ));
        }

        Ok(())
    }
}
