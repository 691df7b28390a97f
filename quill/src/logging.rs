//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::QuillError;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "quill=info,qchat=info,qkeys=info,qstore=warn,warn";

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Fails if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) -> Result<(), QuillError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|error| QuillError::tracing(format!("invalid log filter: {error}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|error| QuillError::tracing(error.to_string()))
}
