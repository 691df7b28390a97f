//! Observability hooks for key selection, block materialization, and store
//! retries.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use qkeys::KeySelector;
//! use qobserve::{SafeKeySelectionHooks, TracingObservabilityHooks};
//! use qstore::InMemoryStore;
//!
//! let selector = KeySelector::new(Arc::new(InMemoryStore::new()))
//!     .with_hooks(Arc::new(SafeKeySelectionHooks::new(TracingObservabilityHooks)));
//! # let _ = selector;
//! ```

mod metrics_hooks;
mod safe_hooks;
mod tracing_hooks;

pub use metrics_hooks::MetricsObservabilityHooks;
pub use safe_hooks::{SafeBlockLifecycleHooks, SafeKeySelectionHooks, SafeRetryHooks};
pub use tracing_hooks::TracingObservabilityHooks;

pub mod prelude {
    pub use crate::{
        MetricsObservabilityHooks, SafeBlockLifecycleHooks, SafeKeySelectionHooks,
        SafeRetryHooks, TracingObservabilityHooks,
    };
}

#[cfg(test)]
mod tests;
