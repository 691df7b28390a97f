//! Runtime wiring: store, key selector, key manager, and turn runner built
//! from one [`QuillConfig`].

use std::sync::Arc;

use qchat::{BlockLifecycleHooks, NoopBlockLifecycleHooks, TurnRunner};
use qcommon::{Clock, NoopRetryHooks, ProviderId, RetryHooks, SystemClock};
use qkeys::{KeyManager, KeySelectionHooks, KeySelector, NoopKeySelectionHooks};
use qobserve::{
    MetricsObservabilityHooks, SafeBlockLifecycleHooks, SafeKeySelectionHooks, SafeRetryHooks,
    TracingObservabilityHooks,
};
use qprovider::ProviderRegistry;
use qstore::{ChatStore, create_store};

use crate::{HookMode, QuillConfig, QuillError};

#[derive(Clone)]
pub struct RuntimeBundle {
    pub store: Arc<dyn ChatStore>,
    pub selector: Arc<KeySelector>,
    pub keys: Arc<KeyManager>,
    pub runner: Arc<TurnRunner>,
}

struct HookSet {
    retry: Arc<dyn RetryHooks>,
    keys: Arc<dyn KeySelectionHooks>,
    blocks: Arc<dyn BlockLifecycleHooks>,
}

fn hook_set(mode: HookMode) -> HookSet {
    match mode {
        HookMode::None => HookSet {
            retry: Arc::new(NoopRetryHooks),
            keys: Arc::new(NoopKeySelectionHooks),
            blocks: Arc::new(NoopBlockLifecycleHooks),
        },
        HookMode::Tracing => HookSet {
            retry: Arc::new(SafeRetryHooks::new(TracingObservabilityHooks)),
            keys: Arc::new(SafeKeySelectionHooks::new(TracingObservabilityHooks)),
            blocks: Arc::new(SafeBlockLifecycleHooks::new(TracingObservabilityHooks)),
        },
        HookMode::Metrics => HookSet {
            retry: Arc::new(SafeRetryHooks::new(MetricsObservabilityHooks)),
            keys: Arc::new(SafeKeySelectionHooks::new(MetricsObservabilityHooks)),
            blocks: Arc::new(SafeBlockLifecycleHooks::new(MetricsObservabilityHooks)),
        },
    }
}

/// Opens the configured store and builds a runtime over it.
pub async fn build_runtime(
    config: &QuillConfig,
    providers: ProviderRegistry,
) -> Result<RuntimeBundle, QuillError> {
    config.validate()?;
    let store = create_store(config.store.clone(), config.retry.policy())?;
    build_runtime_with_store(config, store, providers).await
}

pub async fn build_runtime_with_store(
    config: &QuillConfig,
    store: Arc<dyn ChatStore>,
    providers: ProviderRegistry,
) -> Result<RuntimeBundle, QuillError> {
    build_runtime_with(config, store, providers, Arc::new(SystemClock)).await
}

/// Builds a runtime and writes every `[providers.<id>]` policy to the store.
pub async fn build_runtime_with(
    config: &QuillConfig,
    store: Arc<dyn ChatStore>,
    providers: ProviderRegistry,
    clock: Arc<dyn Clock>,
) -> Result<RuntimeBundle, QuillError> {
    let hooks = hook_set(config.observability.hooks);

    let keys = KeyManager::new(store.clone()).with_clock(Arc::clone(&clock));
    for (provider_id, provider) in &config.providers {
        if provider.is_empty() {
            continue;
        }
        let provider_id = ProviderId::from(provider_id.as_str());
        let policy = keys
            .set_policy(&provider_id, provider.policy_update())
            .await?;
        tracing::debug!(
            provider_id = %provider_id,
            strategy = policy.strategy.as_str(),
            max_failures_before_disable = policy.max_failures_before_disable,
            cooldown_minutes = policy.cooldown_minutes,
            "provider policy applied"
        );
    }

    let selector = Arc::new(
        KeySelector::new(store.clone())
            .with_clock(Arc::clone(&clock))
            .with_hooks(hooks.keys),
    );
    let runner = TurnRunner::new(Arc::clone(&selector), providers, store.clone())
        .with_policy(config.turn.policy(&config.retry))
        .with_hooks(hooks.blocks)
        .with_retry_hooks(hooks.retry)
        .with_clock(clock);

    Ok(RuntimeBundle {
        store,
        selector,
        keys: Arc::new(keys),
        runner: Arc::new(runner),
    })
}
