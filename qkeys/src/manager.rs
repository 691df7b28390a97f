use std::sync::Arc;

use qcommon::{Clock, KeyId, ProviderId, SystemClock};
use qstore::{ApiKey, KeyStore, KeyUsageSummary, ProviderPolicy, SelectionStrategy};

use crate::KeyError;

/// Input for registering a key; `id` is generated when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApiKey {
    pub id: Option<KeyId>,
    pub provider_id: ProviderId,
    pub secret: String,
    pub label: Option<String>,
    pub priority: i32,
    pub is_primary: bool,
}

impl NewApiKey {
    pub fn new(provider_id: impl Into<ProviderId>, secret: impl Into<String>) -> Self {
        Self {
            id: None,
            provider_id: provider_id.into(),
            secret: secret.into(),
            label: None,
            priority: 0,
            is_primary: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<KeyId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }
}

/// Partial policy change; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderPolicyUpdate {
    pub strategy: Option<SelectionStrategy>,
    pub max_failures_before_disable: Option<u32>,
    pub cooldown_minutes: Option<u32>,
}

impl ProviderPolicyUpdate {
    pub fn strategy(strategy: SelectionStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }
}

/// User-facing key administration. The only path into and out of `Disabled`.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn add_key(&self, request: NewApiKey) -> Result<ApiKey, KeyError> {
        if request.provider_id.is_empty() {
            return Err(KeyError::invalid_request("provider id must not be empty"));
        }
        if request.secret.trim().is_empty() {
            return Err(KeyError::invalid_request("api key secret must not be empty"));
        }
        if let Some(id) = &request.id
            && id.is_empty()
        {
            return Err(KeyError::invalid_request("key id must not be blank"));
        }

        let id = request
            .id
            .unwrap_or_else(|| KeyId::new(uuid::Uuid::new_v4().to_string()));
        let now = self.clock.now();
        let mut key = ApiKey::new(id, request.provider_id, request.secret, now)
            .with_priority(request.priority);
        key.label = request.label;

        self.store.insert_key(key.clone()).await?;
        if request.is_primary {
            self.store.set_primary(&key.id, now).await?;
            key.is_primary = true;
        }

        Ok(key)
    }

    pub async fn remove_key(&self, key_id: &KeyId) -> Result<(), KeyError> {
        if self.store.delete_key(key_id).await? {
            Ok(())
        } else {
            Err(missing(key_id))
        }
    }

    pub async fn set_enabled(&self, key_id: &KeyId, enabled: bool) -> Result<(), KeyError> {
        self.expect_updated(
            key_id,
            self.store
                .set_enabled(key_id, enabled, self.clock.now())
                .await?,
        )
    }

    pub async fn set_priority(&self, key_id: &KeyId, priority: i32) -> Result<(), KeyError> {
        self.expect_updated(
            key_id,
            self.store
                .set_priority(key_id, priority, self.clock.now())
                .await?,
        )
    }

    pub async fn set_primary(&self, key_id: &KeyId) -> Result<(), KeyError> {
        self.expect_updated(
            key_id,
            self.store.set_primary(key_id, self.clock.now()).await?,
        )
    }

    pub async fn get_key(&self, key_id: &KeyId) -> Result<ApiKey, KeyError> {
        self.store
            .get_key(key_id)
            .await?
            .ok_or_else(|| missing(key_id))
    }

    pub async fn list_keys(&self, provider_id: &ProviderId) -> Result<Vec<ApiKey>, KeyError> {
        Ok(self.store.keys_by_provider(provider_id).await?)
    }

    pub async fn policy(&self, provider_id: &ProviderId) -> Result<ProviderPolicy, KeyError> {
        Ok(self
            .store
            .get_policy(provider_id)
            .await?
            .unwrap_or_else(|| ProviderPolicy::new(SelectionStrategy::default(), self.clock.now())))
    }

    pub async fn set_policy(
        &self,
        provider_id: &ProviderId,
        update: ProviderPolicyUpdate,
    ) -> Result<ProviderPolicy, KeyError> {
        if provider_id.is_empty() {
            return Err(KeyError::invalid_request("provider id must not be empty"));
        }

        let mut policy = self.policy(provider_id).await?;
        if let Some(strategy) = update.strategy {
            policy.strategy = strategy;
        }
        if let Some(max_failures) = update.max_failures_before_disable {
            policy = policy.with_max_failures(max_failures);
        }
        if let Some(minutes) = update.cooldown_minutes {
            policy = policy.with_cooldown_minutes(minutes);
        }
        policy.updated_at = self.clock.now();

        self.store.put_policy(provider_id, policy.clone()).await?;
        Ok(policy)
    }

    pub async fn usage_summary(
        &self,
        provider_id: &ProviderId,
    ) -> Result<KeyUsageSummary, KeyError> {
        let keys = self.store.keys_by_provider(provider_id).await?;
        Ok(KeyUsageSummary::from_keys(provider_id.clone(), &keys))
    }

    fn expect_updated(&self, key_id: &KeyId, updated: bool) -> Result<(), KeyError> {
        if updated { Ok(()) } else { Err(missing(key_id)) }
    }
}

fn missing(key_id: &KeyId) -> KeyError {
    KeyError::not_found(format!("api key '{key_id}' not found"))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use qcommon::ManualClock;
    use qstore::{InMemoryStore, KeyStatus, UsageUpdate};

    use super::*;
    use crate::KeyErrorKind;

    fn manager() -> (Arc<InMemoryStore>, KeyManager) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(50)));
        let manager = KeyManager::new(store.clone()).with_clock(clock);
        (store, manager)
    }

    #[tokio::test]
    async fn add_key_validates_input_and_generates_ids() {
        let (_, manager) = manager();

        let error = manager
            .add_key(NewApiKey::new("openai", "   "))
            .await
            .expect_err("blank secret should fail");
        assert_eq!(error.kind, KeyErrorKind::InvalidRequest);

        let error = manager
            .add_key(NewApiKey::new("", "sk-1"))
            .await
            .expect_err("blank provider should fail");
        assert_eq!(error.kind, KeyErrorKind::InvalidRequest);

        let key = manager
            .add_key(NewApiKey::new("openai", "sk-1").with_label("team"))
            .await
            .expect("key should be added");
        assert!(!key.id.is_empty());
        assert_eq!(key.label.as_deref(), Some("team"));
        assert_eq!(key.status, KeyStatus::Active);
        assert_eq!(key.created_at, UNIX_EPOCH + Duration::from_secs(50));

        let duplicate = manager
            .add_key(NewApiKey::new("openai", "sk-2").with_id(key.id.clone()))
            .await
            .expect_err("duplicate id should fail");
        assert_eq!(duplicate.kind, KeyErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn primary_flag_moves_between_keys() {
        let (_, manager) = manager();
        let provider = ProviderId::from("openai");
        manager
            .add_key(NewApiKey::new("openai", "sk-1").with_id("k1").primary())
            .await
            .expect("add");
        manager
            .add_key(NewApiKey::new("openai", "sk-2").with_id("k2").primary())
            .await
            .expect("add");

        let primaries: Vec<_> = manager
            .list_keys(&provider)
            .await
            .expect("list")
            .into_iter()
            .filter(|key| key.is_primary)
            .map(|key| key.id)
            .collect();
        assert_eq!(primaries, vec![KeyId::from("k2")]);

        manager.set_primary(&KeyId::from("k1")).await.expect("primary");
        assert!(manager.get_key(&KeyId::from("k1")).await.expect("get").is_primary);
        assert!(!manager.get_key(&KeyId::from("k2")).await.expect("get").is_primary);
    }

    #[tokio::test]
    async fn re_enabling_clears_failure_state() {
        let (store, manager) = manager();
        let key_id = KeyId::from("k1");
        manager
            .add_key(NewApiKey::new("openai", "sk-1").with_id("k1"))
            .await
            .expect("add");
        store
            .increment_usage(
                &key_id,
                UsageUpdate::failure(Some("401".into()), UNIX_EPOCH + Duration::from_secs(60), 1),
            )
            .await
            .expect("increment");

        manager.set_enabled(&key_id, false).await.expect("disable");
        assert_eq!(
            manager.get_key(&key_id).await.expect("get").status,
            KeyStatus::Disabled
        );

        manager.set_enabled(&key_id, true).await.expect("enable");
        let key = manager.get_key(&key_id).await.expect("get");
        assert_eq!(key.status, KeyStatus::Active);
        assert_eq!(key.usage.consecutive_failures, 0);
        assert!(key.last_error.is_none());
    }

    #[tokio::test]
    async fn missing_keys_report_not_found() {
        let (_, manager) = manager();
        let ghost = KeyId::from("ghost");
        for error in [
            manager.remove_key(&ghost).await.expect_err("remove"),
            manager.set_enabled(&ghost, true).await.expect_err("enable"),
            manager.set_priority(&ghost, 3).await.expect_err("priority"),
            manager.set_primary(&ghost).await.expect_err("primary"),
        ] {
            assert_eq!(error.kind, KeyErrorKind::NotFound);
        }
    }

    #[tokio::test]
    async fn set_policy_merges_partial_updates() {
        let (_, manager) = manager();
        let provider = ProviderId::from("openai");

        let policy = manager
            .set_policy(&provider, ProviderPolicyUpdate::strategy(SelectionStrategy::Priority))
            .await
            .expect("policy");
        assert_eq!(policy.strategy, SelectionStrategy::Priority);
        assert_eq!(policy.max_failures_before_disable, 3);

        let policy = manager
            .set_policy(
                &provider,
                ProviderPolicyUpdate {
                    cooldown_minutes: Some(10),
                    ..ProviderPolicyUpdate::default()
                },
            )
            .await
            .expect("policy");
        assert_eq!(policy.strategy, SelectionStrategy::Priority);
        assert_eq!(policy.cooldown_minutes, 10);
        assert_eq!(manager.policy(&provider).await.expect("policy"), policy);
    }

    #[tokio::test]
    async fn usage_summary_counts_provider_keys() {
        let (store, manager) = manager();
        for id in ["k1", "k2"] {
            manager
                .add_key(NewApiKey::new("openai", "sk").with_id(id))
                .await
                .expect("add");
        }
        store
            .increment_usage(&KeyId::from("k1"), UsageUpdate::success(UNIX_EPOCH))
            .await
            .expect("increment");
        manager.set_enabled(&KeyId::from("k2"), false).await.expect("disable");

        let summary = manager
            .usage_summary(&ProviderId::from("openai"))
            .await
            .expect("summary");
        assert_eq!(summary.key_count, 2);
        assert_eq!(summary.enabled_count, 1);
        assert_eq!(summary.total_requests, 1);
        assert_eq!(summary.success_rate(), Some(1.0));
    }
}
