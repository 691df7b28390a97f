//! Per-request key choice and outcome tracking.
//!
//! The selector is a load balancer over a provider's keys plus a circuit
//! breaker per key: `max_failures_before_disable` consecutive failures move a
//! key into `Error`, which keeps it out of rotation for `cooldown_minutes`
//! measured from the trip. A single success closes the breaker again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use qcommon::{Clock, KeyId, ProviderId, SystemClock};
use qstore::{ApiKey, KeyStatus, KeyStore, ProviderPolicy, SelectionStrategy, UsageUpdate};
use rand::Rng;

use crate::{KeyError, KeySelectionHooks, NoopKeySelectionHooks};

pub const NO_ELIGIBLE_KEY: &str = "no eligible key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySelection {
    pub key: Option<ApiKey>,
    pub reason: String,
}

impl KeySelection {
    fn none() -> Self {
        Self {
            key: None,
            reason: NO_ELIGIBLE_KEY.to_string(),
        }
    }

    fn chosen(key: ApiKey, strategy: SelectionStrategy) -> Self {
        Self {
            key: Some(key),
            reason: format!("{strategy} selection"),
        }
    }
}

pub struct KeySelector {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn KeySelectionHooks>,
    cursors: Mutex<HashMap<ProviderId, usize>>,
}

impl KeySelector {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            hooks: Arc::new(NoopKeySelectionHooks),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn KeySelectionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> Arc<dyn KeyStore> {
        Arc::clone(&self.store)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Stored policy for `provider_id`, or the defaults when none is stored.
    pub async fn policy_for(&self, provider_id: &ProviderId) -> Result<ProviderPolicy, KeyError> {
        Ok(self
            .store
            .get_policy(provider_id)
            .await?
            .unwrap_or_else(|| ProviderPolicy::new(SelectionStrategy::default(), self.clock.now())))
    }

    pub async fn select_key(
        &self,
        provider_id: &ProviderId,
        strategy_override: Option<SelectionStrategy>,
    ) -> Result<KeySelection, KeyError> {
        self.select_key_excluding(provider_id, strategy_override, &[])
            .await
    }

    /// [`Self::select_key`] over the eligible keys not listed in `excluded`.
    pub async fn select_key_excluding(
        &self,
        provider_id: &ProviderId,
        strategy_override: Option<SelectionStrategy>,
        excluded: &[KeyId],
    ) -> Result<KeySelection, KeyError> {
        let policy = self.policy_for(provider_id).await?;
        let strategy = strategy_override.unwrap_or(policy.strategy);
        let cooldown = policy.cooldown();

        let keys = self.store.keys_by_provider(provider_id).await?;
        let total_keys = keys.len();
        let now = self.clock.now();
        let mut candidates: Vec<ApiKey> = keys
            .into_iter()
            .filter(|key| {
                &key.provider_id == provider_id
                    && key.is_selectable(now, cooldown)
                    && !excluded.contains(&key.id)
            })
            .collect();
        candidates.sort_by(|left, right| left.id.cmp(&right.id));

        let Some(index) = self.pick(provider_id, strategy, &candidates)? else {
            self.hooks.on_no_eligible_key(provider_id, total_keys);
            return Ok(KeySelection::none());
        };

        let key = candidates.swap_remove(index);
        self.hooks.on_key_selected(provider_id, &key.id, strategy);
        Ok(KeySelection::chosen(key, strategy))
    }

    /// Index into id-sorted `candidates`, or `None` when there are none.
    fn pick(
        &self,
        provider_id: &ProviderId,
        strategy: SelectionStrategy,
        candidates: &[ApiKey],
    ) -> Result<Option<usize>, KeyError> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let index = match strategy {
            SelectionStrategy::Priority => lowest_by(candidates, |key| i64::from(key.priority)),
            SelectionStrategy::LeastUsed => lowest_by(candidates, |key| {
                i64::try_from(key.usage.total_requests).unwrap_or(i64::MAX)
            }),
            SelectionStrategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
            SelectionStrategy::RoundRobin => {
                let mut cursors = self
                    .cursors
                    .lock()
                    .map_err(|_| KeyError::store("round-robin cursor lock poisoned"))?;
                let cursor = cursors.entry(provider_id.clone()).or_insert(0);
                let index = *cursor % candidates.len();
                *cursor = (index + 1) % candidates.len();
                index
            }
        };

        Ok(Some(index))
    }

    /// Records one request outcome against `key_id` and returns the updated key.
    ///
    /// Reports for user-disabled keys are accepted and ignored.
    pub async fn report_outcome(
        &self,
        key_id: &KeyId,
        success: bool,
        error_message: Option<String>,
    ) -> Result<ApiKey, KeyError> {
        let before = self
            .store
            .get_key(key_id)
            .await?
            .ok_or_else(|| KeyError::not_found(format!("api key '{key_id}' not found")))?;
        let policy = self.policy_for(&before.provider_id).await?;
        let threshold = policy.max_failures_before_disable.max(1);

        let now = self.clock.now();
        let update = if success {
            UsageUpdate::success(now)
        } else {
            UsageUpdate::failure(error_message, now, threshold)
        };

        let after = self
            .store
            .increment_usage(key_id, update)
            .await?
            .ok_or_else(|| KeyError::not_found(format!("api key '{key_id}' not found")))?;

        if !after.is_enabled || after.status == KeyStatus::Disabled {
            return Ok(after);
        }

        self.hooks.on_outcome_recorded(&after, success);
        if success {
            if before.status == KeyStatus::Error {
                self.hooks.on_key_recovered(&after);
            }
        } else if after.status == KeyStatus::Error
            && (before.status != KeyStatus::Error || !before.is_in_cooldown(now, policy.cooldown()))
        {
            // Each failure that opens a new cooldown window counts as a trip.
            self.hooks.on_key_tripped(&after);
        }

        Ok(after)
    }

    /// `false` for unknown keys.
    pub async fn is_in_cooldown(&self, key_id: &KeyId) -> Result<bool, KeyError> {
        let Some(key) = self.store.get_key(key_id).await? else {
            return Ok(false);
        };
        let cooldown = self.cooldown_for(&key.provider_id).await?;
        Ok(key.is_in_cooldown(self.clock.now(), cooldown))
    }

    async fn cooldown_for(&self, provider_id: &ProviderId) -> Result<Duration, KeyError> {
        Ok(self.policy_for(provider_id).await?.cooldown())
    }
}

fn lowest_by(candidates: &[ApiKey], rank: impl Fn(&ApiKey) -> i64) -> usize {
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, left), (_, right)| {
            rank(*left)
                .cmp(&rank(*right))
                .then_with(|| left.id.cmp(&right.id))
        })
        .map(|(index, _)| index)
        .unwrap_or(0)
}
