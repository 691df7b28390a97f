use qcommon::{KeyId, ProviderId};
use qstore::{ApiKey, SelectionStrategy};

/// Observation points for key selection and failure tracking.
///
/// Implementations must not block; they run inline on the request path.
pub trait KeySelectionHooks: Send + Sync {
    fn on_key_selected(
        &self,
        _provider_id: &ProviderId,
        _key_id: &KeyId,
        _strategy: SelectionStrategy,
    ) {
    }

    fn on_no_eligible_key(&self, _provider_id: &ProviderId, _total_keys: usize) {}

    fn on_outcome_recorded(&self, _key: &ApiKey, _success: bool) {}

    /// The key just reached its failure threshold and entered `Error`.
    fn on_key_tripped(&self, _key: &ApiKey) {}

    fn on_key_recovered(&self, _key: &ApiKey) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeySelectionHooks;

impl KeySelectionHooks for NoopKeySelectionHooks {}
