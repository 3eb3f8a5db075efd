//! Retry with exponential backoff.
//!
//! Key properties:
//! - At most `max_retries + 1` invocations of the wrapped operation
//! - Delay before retry `n` (1-based) is `min(base_delay * 2^(n-1), max_delay)`
//! - Optional jitter scales the delay by a random factor in `[0.5, 1.5)`,
//!   still capped at `max_delay`
//! - Errors whose kind is not retryable are returned on the first failure
//! - When retries run out, the last error is returned unchanged
//!
//! The backoff wait uses `tokio::time::sleep`, so the calling task is held for
//! the whole delay and nothing else in that task makes progress.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use radar_common::{ErrorKind, RadarError};

/// Errors that can report their [`ErrorKind`].
pub trait Classify {
    fn error_kind(&self) -> ErrorKind;
}

impl Classify for RadarError {
    fn error_kind(&self) -> ErrorKind {
        self.kind()
    }
}

/// Which error kinds trigger another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryOn {
    /// Every failure is retried
    #[default]
    AllKinds,
    /// Only failures of the listed kinds are retried
    Kinds(HashSet<ErrorKind>),
}

impl RetryOn {
    /// Network failures and timeouts only.
    pub fn transient() -> Self {
        RetryOn::Kinds([ErrorKind::Network, ErrorKind::Timeout].into_iter().collect())
    }

    pub fn kinds(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        RetryOn::Kinds(kinds.into_iter().collect())
    }

    pub fn matches(&self, kind: ErrorKind) -> bool {
        match self {
            RetryOn::AllKinds => true,
            RetryOn::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

/// What the retry hook sees before each backoff wait.
pub struct RetryEvent<'a> {
    pub operation: &'a str,
    /// 1-based retry number
    pub attempt: u32,
    pub delay: Duration,
    pub kind: ErrorKind,
    pub error: &'a dyn fmt::Display,
}

/// Observer called before each retry. It cannot influence control flow.
pub type RetryHook = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// Retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first failure
    pub max_retries: u32,
    /// Delay before the first retry (doubles each retry)
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Randomize delays to spread out concurrent callers
    pub jitter: bool,
    pub retry_on: RetryOn,
    pub on_retry: Option<RetryHook>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
            retry_on: RetryOn::AllKinds,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryEvent<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Un-jittered delay before retry `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts `max_retries`.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let mut retries = 0u32;

        loop {
            match op().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(operation = %operation, retries = retries, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.error_kind();

                    if !self.retry_on.matches(kind) {
                        debug!(
                            operation = %operation,
                            kind = %kind,
                            error = %err,
                            "Error kind is not retryable"
                        );
                        return Err(err);
                    }

                    if retries >= self.max_retries {
                        warn!(
                            operation = %operation,
                            retries = retries,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    }

                    retries += 1;
                    let mut delay = self.backoff_delay(retries);
                    if self.jitter {
                        delay = self.jittered(delay);
                    }

                    if let Some(hook) = &self.on_retry {
                        hook(&RetryEvent {
                            operation,
                            attempt: retries,
                            delay,
                            kind,
                            error: &err,
                        });
                    }

                    warn!(
                        operation = %operation,
                        retry = retries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// A named operation bundled with its retry policy.
///
/// Keeps the wrapped operation's name and description available for logging
/// and introspection. The operation is any `Fn() -> Future`; bind a method by
/// capturing the receiver, e.g. `|| client.fetch()`.
pub struct RetryableOperation<F> {
    name: String,
    description: Option<String>,
    policy: RetryPolicy,
    op: F,
}

impl<F> RetryableOperation<F> {
    pub fn new(name: impl Into<String>, policy: RetryPolicy, op: F) -> Self {
        Self {
            name: name.into(),
            description: None,
            policy,
            op,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke the operation under the retry policy.
    pub async fn call<Fut, T, E>(&self) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.policy.run(&self.name, || (self.op)()).await
    }
}

impl<F> fmt::Debug for RetryableOperation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableOperation")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000));
        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.backoff_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000]);
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(64), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_millis(400), Duration::from_millis(500))
            .with_jitter(true);
        for _ in 0..200 {
            let d = policy.jittered(Duration::from_millis(400));
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_retry_on_transient() {
        let on = RetryOn::transient();
        assert!(on.matches(ErrorKind::Network));
        assert!(on.matches(ErrorKind::Timeout));
        assert!(!on.matches(ErrorKind::Processing));
        assert!(RetryOn::AllKinds.matches(ErrorKind::Validation));
    }
}
