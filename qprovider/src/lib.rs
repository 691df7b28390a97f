//! Provider-facing contracts: streaming chunks, requests, errors, and lookup.
//!
//! ```rust
//! use qprovider::{Message, ProviderErrorKind, Role, SecretString, StreamRequest};
//!
//! let ok = StreamRequest::new(
//!     SecretString::new("sk-test"),
//!     "gpt-4o-mini",
//!     vec![Message::new(Role::User, "Summarize this diff")],
//! );
//! assert!(ok.validate().is_ok());
//!
//! let err = StreamRequest::new(SecretString::new("sk-test"), "", Vec::new())
//!     .validate()
//!     .expect_err("empty model should fail");
//! assert_eq!(err.kind, ProviderErrorKind::InvalidRequest);
//! ```

mod error;
mod model;
mod provider;
mod registry;
mod stream;

pub mod prelude;

pub use error::{ProviderError, ProviderErrorKind};
pub use model::{Message, Role, StreamRequest};
pub use provider::ChatProvider;
pub use qcommon::{ProviderId, SecretString};
pub use registry::ProviderRegistry;
pub use stream::{ChatChunkStream, ChunkStream, StreamChunk, VecChunkStream};
