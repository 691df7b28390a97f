//! TOML configuration for a quill runtime.
//!
//! ```rust
//! use quill::QuillConfig;
//! use quill::qstore::{SelectionStrategy, StoreBackendConfig};
//!
//! let config = QuillConfig::from_toml_str(
//!     r#"
//!     [store]
//!     backend = "in_memory"
//!
//!     [turn]
//!     max_key_attempts = 2
//!
//!     [providers.openai]
//!     strategy = "priority"
//!     cooldown_minutes = 10
//!     "#,
//! )
//! .expect("config should parse");
//!
//! assert_eq!(config.store, StoreBackendConfig::InMemory);
//! assert_eq!(config.turn.max_key_attempts, 2);
//! assert_eq!(config.providers["openai"].strategy, Some(SelectionStrategy::Priority));
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use qchat::{INCOMPLETE_TOOL_MESSAGE, TerminalPolicy, TurnPolicy};
use qcommon::RetryPolicy;
use qkeys::ProviderPolicyUpdate;
use qstore::{BlockStatus, SelectionStrategy, StoreBackendConfig};
use serde::{Deserialize, Serialize};

use crate::QuillError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuillConfig {
    pub store: StoreBackendConfig,
    pub retry: RetryConfig,
    pub turn: TurnConfig,
    pub observability: ObservabilityConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl QuillConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, QuillError> {
        let config: Self = toml::from_str(source)
            .map_err(|error| QuillError::config(format!("failed to parse TOML: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, QuillError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|error| {
            QuillError::config(format!("failed to read '{}': {error}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String, QuillError> {
        toml::to_string_pretty(self)
            .map_err(|error| QuillError::config(format!("failed to render TOML: {error}")))
    }

    pub fn validate(&self) -> Result<(), QuillError> {
        if self.retry.max_attempts == 0 {
            return Err(QuillError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(QuillError::config(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.turn.max_key_attempts == 0 {
            return Err(QuillError::config("turn.max_key_attempts must be at least 1"));
        }
        for (provider_id, provider) in &self.providers {
            if provider_id.trim().is_empty() {
                return Err(QuillError::config("provider ids must not be empty"));
            }
            if provider.max_failures_before_disable == Some(0) {
                return Err(QuillError::config(format!(
                    "providers.{provider_id}.max_failures_before_disable must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

/// Store retry schedule, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: duration_ms(policy.initial_backoff),
            max_backoff_ms: duration_ms(policy.max_backoff),
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Status given to tool blocks still pending when a stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingToolStatus {
    #[default]
    Error,
    Success,
}

impl PendingToolStatus {
    pub fn block_status(self) -> BlockStatus {
        match self {
            Self::Error => BlockStatus::Error,
            Self::Success => BlockStatus::Success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TurnConfig {
    pub max_key_attempts: u32,
    pub pending_tool_status: PendingToolStatus,
    pub incomplete_tool_message: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_key_attempts: TurnPolicy::default().max_key_attempts,
            pending_tool_status: PendingToolStatus::default(),
            incomplete_tool_message: INCOMPLETE_TOOL_MESSAGE.to_string(),
        }
    }
}

impl TurnConfig {
    /// Turn policy whose block flushes follow `retry`.
    pub fn policy(&self, retry: &RetryConfig) -> TurnPolicy {
        TurnPolicy {
            max_key_attempts: self.max_key_attempts.max(1),
            flush_retry: retry.policy(),
            terminal: TerminalPolicy {
                pending_tool_status: self.pending_tool_status.block_status(),
                incomplete_tool_message: self.incomplete_tool_message.clone(),
            },
        }
    }
}

/// Which hook implementation the runtime installs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookMode {
    None,
    #[default]
    Tracing,
    Metrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    pub hooks: HookMode,
}

/// Per-provider policy overrides. Unset fields keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub strategy: Option<SelectionStrategy>,
    pub max_failures_before_disable: Option<u32>,
    pub cooldown_minutes: Option<u32>,
}

impl ProviderConfig {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn policy_update(&self) -> ProviderPolicyUpdate {
        ProviderPolicyUpdate {
            strategy: self.strategy,
            max_failures_before_disable: self.max_failures_before_disable,
            cooldown_minutes: self.cooldown_minutes,
        }
    }
}
