//! Bounded retry with exponential backoff for transient failures.
//!
//! ```rust
//! use std::time::Duration;
//! use qcommon::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3);
//! assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(50));
//! assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(100));
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether repeating the same operation may succeed.
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;

    fn kind_label(&self) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn should_retry(&self, attempt: u32, error: &dyn Retryable) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = (attempt.saturating_sub(1)) as i32;
        let unbounded = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(unbounded.min(self.max_backoff.as_secs_f64()))
    }
}

pub trait RetryHooks: Send + Sync {
    fn on_attempt_start(&self, _operation: &str, _attempt: u32) {}

    fn on_retry_scheduled(
        &self,
        _operation: &str,
        _attempt: u32,
        _delay: Duration,
        _error: &dyn Retryable,
    ) {
    }

    fn on_success(&self, _operation: &str, _attempts: u32) {}

    fn on_failure(&self, _operation: &str, _attempts: u32, _error: &dyn Retryable) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRetryHooks;

impl RetryHooks for NoopRetryHooks {}

/// Runs `execute` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is spent. `sleep` is injected so callers choose the
/// timer (and tests can skip waiting).
pub async fn execute_with_retry<T, E, Op, OpFuture, Sleep, SleepFuture>(
    operation: &str,
    policy: &RetryPolicy,
    hooks: &dyn RetryHooks,
    mut execute: Op,
    mut sleep: Sleep,
) -> Result<T, E>
where
    E: Retryable,
    Op: FnMut(u32) -> OpFuture,
    OpFuture: Future<Output = Result<T, E>>,
    Sleep: FnMut(Duration) -> SleepFuture,
    SleepFuture: Future<Output = ()>,
{
    let mut attempt = 1;

    loop {
        hooks.on_attempt_start(operation, attempt);

        match execute(attempt).await {
            Ok(value) => {
                hooks.on_success(operation, attempt);
                return Ok(value);
            }
            Err(error) => {
                if policy.should_retry(attempt, &error) {
                    let delay = policy.backoff_for_attempt(attempt);
                    hooks.on_retry_scheduled(operation, attempt, delay, &error);
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                hooks.on_failure(operation, attempt, &error);
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::{Display, Formatter};
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }

        fn kind_label(&self) -> String {
            if self.retryable { "Busy" } else { "Fatal" }.to_string()
        }
    }

    #[test]
    fn retry_policy_uses_retryable_flag_and_attempt_limit() {
        let policy = RetryPolicy::new(3);
        let retryable = TestError { retryable: true };
        let fatal = TestError { retryable: false };

        assert!(policy.should_retry(1, &retryable));
        assert!(policy.should_retry(2, &retryable));
        assert!(!policy.should_retry(3, &retryable));
        assert!(!policy.should_retry(1, &fatal));
        assert!(!RetryPolicy::no_retry().should_retry(1, &retryable));
    }

    #[test]
    fn retry_policy_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(250));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(250));
    }

    #[test]
    fn retry_policy_new_clamps_zero_attempts() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<String>>,
    }

    impl RetryHooks for RecordingHooks {
        fn on_attempt_start(&self, operation: &str, attempt: u32) {
            self.events
                .lock()
                .expect("events lock")
                .push(format!("start:{operation}:{attempt}"));
        }

        fn on_retry_scheduled(
            &self,
            operation: &str,
            attempt: u32,
            _delay: Duration,
            _error: &dyn Retryable,
        ) {
            self.events
                .lock()
                .expect("events lock")
                .push(format!("retry:{operation}:{attempt}"));
        }

        fn on_success(&self, operation: &str, attempts: u32) {
            self.events
                .lock()
                .expect("events lock")
                .push(format!("success:{operation}:{attempts}"));
        }

        fn on_failure(&self, operation: &str, attempts: u32, error: &dyn Retryable) {
            self.events
                .lock()
                .expect("events lock")
                .push(format!("failure:{operation}:{attempts}:{}", error.kind_label()));
        }
    }

    #[tokio::test]
    async fn execute_with_retry_retries_and_reports_hooks() {
        let policy = RetryPolicy::new(3);
        let hooks = RecordingHooks::default();
        let attempts = Arc::new(Mutex::new(0_u32));
        let sleeps = Arc::new(Mutex::new(Vec::new()));

        let result = execute_with_retry(
            "store.replace_blocks",
            &policy,
            &hooks,
            {
                let attempts = Arc::clone(&attempts);
                move |attempt| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        *attempts.lock().expect("attempts lock") = attempt;
                        if attempt < 3 {
                            Err(TestError { retryable: true })
                        } else {
                            Ok("ok")
                        }
                    }
                }
            },
            {
                let sleeps = Arc::clone(&sleeps);
                move |delay| {
                    let sleeps = Arc::clone(&sleeps);
                    async move {
                        sleeps.lock().expect("sleep lock").push(delay);
                    }
                }
            },
        )
        .await;

        assert_eq!(result.expect("result should succeed"), "ok");
        assert_eq!(*attempts.lock().expect("attempts lock"), 3);
        assert_eq!(sleeps.lock().expect("sleep lock").len(), 2);

        let events = hooks.events.lock().expect("events lock").clone();
        assert!(events.contains(&"success:store.replace_blocks:3".to_string()));
        assert!(events.contains(&"retry:store.replace_blocks:1".to_string()));
    }

    #[tokio::test]
    async fn execute_with_retry_stops_on_non_retryable_error() {
        let policy = RetryPolicy::new(5);
        let hooks = RecordingHooks::default();

        let result = execute_with_retry::<(), _, _, _, _, _>(
            "store.increment_usage",
            &policy,
            &hooks,
            |_| async move { Err(TestError { retryable: false }) },
            |_| async move {},
        )
        .await;

        let error = result.expect_err("result should fail");
        assert!(!error.retryable);
        let events = hooks.events.lock().expect("events lock").clone();
        assert!(
            events
                .iter()
                .any(|item| item == "failure:store.increment_usage:1:Fatal")
        );
    }

    #[tokio::test]
    async fn execute_with_retry_gives_up_after_attempt_budget() {
        let policy = RetryPolicy::new(2);
        let calls = Arc::new(Mutex::new(0_u32));

        let result = execute_with_retry::<(), _, _, _, _, _>(
            "store.replace_blocks",
            &policy,
            &NoopRetryHooks,
            {
                let calls = Arc::clone(&calls);
                move |_| {
                    let calls = Arc::clone(&calls);
                    async move {
                        *calls.lock().expect("calls lock") += 1;
                        Err(TestError { retryable: true })
                    }
                }
            },
            |_| async move {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().expect("calls lock"), 2);
    }
}
