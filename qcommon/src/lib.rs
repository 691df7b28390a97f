//! Shared identifiers, clocks, and retry utilities for workspace crates.
//!
//! ```rust
//! use qcommon::{KeyId, MessageId, ProviderId};
//!
//! let provider = ProviderId::from("openai");
//! let key = KeyId::new("key-1");
//! let message = MessageId::from("message-1");
//!
//! assert_eq!(provider.as_str(), "openai");
//! assert_eq!(key.to_string(), "key-1");
//! assert_eq!(message.as_str(), "message-1");
//! ```

mod resilience;

pub mod future {
    //! Shared async future aliases.
    //!
    //! ```rust
    //! use qcommon::BoxFuture;
    //!
    //! fn str_len<'a>(value: &'a str) -> BoxFuture<'a, usize> {
    //!     Box::pin(async move { value.len() })
    //! }
    //!
    //! let _future = str_len("hello");
    //! ```

    use std::future::Future;
    use std::pin::Pin;

    pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
}

pub mod context {
    //! Cross-crate identifier newtypes.
    //!
    //! ```rust
    //! use qcommon::{BlockId, ProviderId};
    //!
    //! let block = BlockId::new("block-7");
    //! let provider = ProviderId::from("anthropic");
    //!
    //! assert_eq!(block.as_str(), "block-7");
    //! assert_eq!(provider.to_string(), "anthropic");
    //! ```

    use std::fmt::{Display, Formatter};

    macro_rules! string_id {
        ($(#[$meta:meta])* $name:ident) => {
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(String);

            impl $name {
                pub fn new(value: impl Into<String>) -> Self {
                    Self(value.into())
                }

                pub fn as_str(&self) -> &str {
                    self.0.as_str()
                }

                pub fn is_empty(&self) -> bool {
                    self.0.trim().is_empty()
                }
            }

            impl Display for $name {
                fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<String> for $name {
                fn from(value: String) -> Self {
                    Self(value)
                }
            }

            impl From<&str> for $name {
                fn from(value: &str) -> Self {
                    Self(value.to_string())
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    self.0.as_str()
                }
            }
        };
    }

    string_id!(
        /// Logical provider name such as `openai` or `anthropic`.
        ProviderId
    );
    string_id!(
        /// Identifier of one stored API key record.
        KeyId
    );
    string_id!(
        /// Identifier of one chat message whose blocks are materialized.
        MessageId
    );
    string_id!(
        /// Identifier of one content block.
        BlockId
    );
}

pub mod clock {
    //! Wall-clock abstraction so cooldown windows can be tested deterministically.
    //!
    //! ```rust
    //! use std::time::{Duration, UNIX_EPOCH};
    //! use qcommon::{Clock, ManualClock};
    //!
    //! let clock = ManualClock::new(UNIX_EPOCH + Duration::from_secs(100));
    //! clock.advance(Duration::from_secs(5));
    //! assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(105));
    //! ```

    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    pub trait Clock: Send + Sync {
        fn now(&self) -> SystemTime;
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> SystemTime {
            SystemTime::now()
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<SystemTime>,
    }

    impl ManualClock {
        pub fn new(start: SystemTime) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *now += by;
        }

        pub fn set(&self, value: SystemTime) {
            let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *now = value;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(SystemTime::now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    /// Time elapsed from `earlier` to `now`, saturating to zero for clock skew.
    pub fn elapsed_since(now: SystemTime, earlier: SystemTime) -> Duration {
        now.duration_since(earlier).unwrap_or(Duration::ZERO)
    }
}

pub mod secret {
    //! Credential values that never print themselves.
    //!
    //! ```rust
    //! use qcommon::SecretString;
    //!
    //! let secret = SecretString::new("sk-test-abcd1234");
    //! assert_eq!(format!("{secret:?}"), "[REDACTED]");
    //! assert_eq!(secret.masked(), "****1234");
    //! ```

    #[derive(Clone, PartialEq, Eq)]
    pub struct SecretString {
        value: String,
    }

    impl SecretString {
        pub fn new(value: impl Into<String>) -> Self {
            Self {
                value: value.into(),
            }
        }

        pub fn expose(&self) -> &str {
            self.value.as_str()
        }

        pub fn is_empty(&self) -> bool {
            self.value.trim().is_empty()
        }

        /// Display form that reveals at most the last four characters.
        pub fn masked(&self) -> String {
            let chars: Vec<char> = self.value.chars().collect();
            if chars.len() <= 8 {
                return "****".to_string();
            }

            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("****{tail}")
        }
    }

    impl std::fmt::Debug for SecretString {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("[REDACTED]")
        }
    }

    impl Drop for SecretString {
        fn drop(&mut self) {
            unsafe {
                self.value.as_mut_vec().fill(0);
            }
        }
    }
}

pub use clock::{Clock, ManualClock, SystemClock, elapsed_since};
pub use context::{BlockId, KeyId, MessageId, ProviderId};
pub use future::BoxFuture;
pub use secret::SecretString;
pub use resilience::{
    NoopRetryHooks, RetryHooks, RetryPolicy, Retryable, execute_with_retry,
};
