//! Durable key, policy, and content-block records.

use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

use qcommon::{BlockId, KeyId, MessageId, ProviderId, SecretString, elapsed_since};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FAILURES_BEFORE_DISABLE: u32 = 3;
pub const DEFAULT_COOLDOWN_MINUTES: u32 = 5;

/// Health label of an API key.
///
/// `Disabled` is only ever set by a user toggle, `Error` only by automatic
/// failure tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Disabled,
    Error,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for KeyStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Priority,
    LeastUsed,
    Random,
}

impl SelectionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Priority => "priority",
            Self::LeastUsed => "least_used",
            Self::Random => "random",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Some(Self::RoundRobin),
            "priority" => Some(Self::Priority),
            "least_used" | "least-used" | "leastused" => Some(Self::LeastUsed),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

impl Display for SelectionStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyUsage {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub last_used_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: KeyId,
    pub provider_id: ProviderId,
    pub secret: SecretString,
    pub label: Option<String>,
    pub is_enabled: bool,
    pub is_primary: bool,
    pub priority: i32,
    pub status: KeyStatus,
    pub last_error: Option<String>,
    pub usage: KeyUsage,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl ApiKey {
    pub fn new(
        id: impl Into<KeyId>,
        provider_id: impl Into<ProviderId>,
        secret: impl Into<String>,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            secret: SecretString::new(secret),
            label: None,
            is_enabled: true,
            is_primary: false,
            priority: 0,
            status: KeyStatus::Active,
            last_error: None,
            usage: KeyUsage::default(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self.status = KeyStatus::Disabled;
        self
    }

    /// `true` while a tripped key is still inside its cooldown window.
    pub fn is_in_cooldown(&self, now: SystemTime, cooldown: Duration) -> bool {
        self.status == KeyStatus::Error && elapsed_since(now, self.updated_at) < cooldown
    }

    /// Candidate check used by selection: enabled, not user-disabled, and not
    /// cooling down.
    pub fn is_selectable(&self, now: SystemTime, cooldown: Duration) -> bool {
        self.is_enabled
            && self.status != KeyStatus::Disabled
            && !self.is_in_cooldown(now, cooldown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub strategy: SelectionStrategy,
    pub max_failures_before_disable: u32,
    pub cooldown_minutes: u32,
    pub updated_at: SystemTime,
}

impl ProviderPolicy {
    pub fn new(strategy: SelectionStrategy, updated_at: SystemTime) -> Self {
        Self {
            strategy,
            max_failures_before_disable: DEFAULT_MAX_FAILURES_BEFORE_DISABLE,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            updated_at,
        }
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures_before_disable = max_failures.max(1);
        self
    }

    pub fn with_cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.cooldown_minutes) * 60)
    }
}

/// One outcome report, applied by the store as atomic counter increments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageUpdate {
    pub success: bool,
    pub error_message: Option<String>,
    pub at: SystemTime,
    /// Consecutive failures at which the key trips into `Error`.
    pub failure_threshold: u32,
}

impl UsageUpdate {
    pub fn success(at: SystemTime) -> Self {
        Self {
            success: true,
            error_message: None,
            at,
            failure_threshold: DEFAULT_MAX_FAILURES_BEFORE_DISABLE,
        }
    }

    pub fn failure(error_message: Option<String>, at: SystemTime, failure_threshold: u32) -> Self {
        Self {
            success: false,
            error_message,
            at,
            failure_threshold: failure_threshold.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUsageSummary {
    pub provider_id: ProviderId,
    pub key_count: usize,
    pub enabled_count: usize,
    pub error_count: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl KeyUsageSummary {
    pub fn from_keys(provider_id: ProviderId, keys: &[ApiKey]) -> Self {
        keys.iter().fold(
            Self {
                provider_id,
                key_count: 0,
                enabled_count: 0,
                error_count: 0,
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
            },
            |mut summary, key| {
                summary.key_count += 1;
                if key.is_enabled && key.status != KeyStatus::Disabled {
                    summary.enabled_count += 1;
                }
                if key.status == KeyStatus::Error {
                    summary.error_count += 1;
                }
                summary.total_requests += key.usage.total_requests;
                summary.successful_requests += key.usage.successful_requests;
                summary.failed_requests += key.usage.failed_requests;
                summary
            },
        )
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.total_requests == 0 {
            return None;
        }

        Some(self.successful_requests as f64 / self.total_requests as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Text,
    Tool,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    Pending,
    Success,
    Error,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    pub id: BlockId,
    pub message_id: MessageId,
    pub block_type: BlockType,
    pub status: BlockStatus,
    pub content: String,
    pub sort_order: u32,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_args: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl ContentBlock {
    pub fn is_tool(&self) -> bool {
        self.block_type == BlockType::Tool
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn strategy_parse_accepts_aliases() {
        assert_eq!(SelectionStrategy::parse("round-robin"), Some(SelectionStrategy::RoundRobin));
        assert_eq!(SelectionStrategy::parse("LEAST_USED"), Some(SelectionStrategy::LeastUsed));
        assert_eq!(SelectionStrategy::parse("priority"), Some(SelectionStrategy::Priority));
        assert_eq!(SelectionStrategy::parse("weighted"), None);
        assert_eq!(SelectionStrategy::default(), SelectionStrategy::RoundRobin);
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [KeyStatus::Active, KeyStatus::Disabled, KeyStatus::Error] {
            assert_eq!(KeyStatus::parse(status.as_str()), Some(status));
        }
        for status in [BlockStatus::Pending, BlockStatus::Success, BlockStatus::Error] {
            assert_eq!(BlockStatus::parse(status.as_str()), Some(status));
        }
        assert!(!BlockStatus::Pending.is_terminal());
        assert!(BlockStatus::Error.is_terminal());
    }

    #[test]
    fn error_key_is_in_cooldown_until_window_elapses() {
        let mut key = ApiKey::new("k1", "openai", "sk-1", at(0));
        key.status = KeyStatus::Error;
        key.updated_at = at(100);
        let cooldown = Duration::from_secs(300);

        assert!(key.is_in_cooldown(at(100), cooldown));
        assert!(key.is_in_cooldown(at(399), cooldown));
        assert!(!key.is_in_cooldown(at(400), cooldown));
        assert!(!key.is_selectable(at(200), cooldown));
        assert!(key.is_selectable(at(400), cooldown));
    }

    #[test]
    fn disabled_key_is_never_selectable() {
        let key = ApiKey::new("k1", "openai", "sk-1", at(0)).disabled();
        assert!(!key.is_selectable(at(10_000), Duration::ZERO));
        assert!(!key.is_in_cooldown(at(0), Duration::from_secs(60)));
    }

    #[test]
    fn provider_policy_defaults_and_cooldown() {
        let policy = ProviderPolicy::new(SelectionStrategy::Priority, at(0));
        assert_eq!(policy.max_failures_before_disable, 3);
        assert_eq!(policy.cooldown(), Duration::from_secs(300));
        assert_eq!(policy.clone().with_max_failures(0).max_failures_before_disable, 1);
    }

    #[test]
    fn usage_summary_aggregates_keys() {
        let mut first = ApiKey::new("k1", "openai", "sk-1", at(0));
        first.usage.total_requests = 4;
        first.usage.successful_requests = 3;
        first.usage.failed_requests = 1;
        let mut second = ApiKey::new("k2", "openai", "sk-2", at(0));
        second.status = KeyStatus::Error;
        second.usage.total_requests = 2;
        second.usage.failed_requests = 2;
        let third = ApiKey::new("k3", "openai", "sk-3", at(0)).disabled();

        let summary = KeyUsageSummary::from_keys(ProviderId::from("openai"), &[first, second, third]);
        assert_eq!(summary.key_count, 3);
        assert_eq!(summary.enabled_count, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.total_requests, 6);
        assert_eq!(summary.success_rate(), Some(0.5));
    }
}
