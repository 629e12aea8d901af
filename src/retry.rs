//! Retry strategies, predicates, and the retry loop.
//!
//! The client only ever sees the narrow [`Retry`] capability: run an
//! attempt under a [`Context`] until it succeeds or fails for good. The
//! stock implementation, [`Retrier`], combines a [`RetryStrategy`] (how
//! long to cool down before each retry) with a [`RetryPredicate`] (which
//! failures are worth another attempt). Either half can be swapped, or the
//! whole [`Retry`] replaced, without touching the client.

use crate::{Context, Error, Operation, Result};
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Returns `true` if a transport failure is worth another attempt.
///
/// Transient: connect failures (refused, DNS lookup, TLS handshake),
/// timeouts, and failures while sending (connection reset). Not transient:
/// request construction, redirect loops, and decoding failures, which
/// another attempt would only repeat.
///
/// Failures while reading a 200 body are reported as [`Error::Body`] and
/// are always retryable, whatever kind reqwest gives them.
pub fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_builder() || err.is_redirect() || err.is_decode() {
        return false;
    }
    err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
}

/// Defines how long to wait before each retry.
///
/// # Examples
///
/// ```
/// use netagent_client::RetryStrategy;
/// use std::time::Duration;
///
/// // No retries
/// let no_retry = RetryStrategy::None;
///
/// // 1s, 2s, 4s, 8s... until the call's context gives up
/// let exponential = RetryStrategy::default();
/// assert_eq!(exponential.delay_for_attempt(3), Some(Duration::from_secs(4)));
///
/// // 500ms between each of at most three retries
/// let fixed = RetryStrategy::Fixed {
///     delay: Duration::from_millis(500),
///     max_retries: Some(3),
/// };
/// assert_eq!(fixed.delay_for_attempt(4), None);
/// ```
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Do not retry.
    None,

    /// Retry with exponentially increasing delays.
    ///
    /// Each retry waits `initial_delay * multiplier^(attempt - 1)`, capped
    /// at `max_delay` when set.
    ExponentialBackoff {
        /// The delay before the first retry.
        initial_delay: Duration,
        /// Growth factor between consecutive delays.
        multiplier: u32,
        /// Upper bound for a single delay.
        max_delay: Option<Duration>,
        /// Maximum number of retries; `None` leaves the limit to the context.
        max_retries: Option<usize>,
        /// Whether to scale each delay by a random factor in `[0.5, 1.0]`.
        jitter: bool,
    },

    /// Retry with a fixed delay between attempts.
    Fixed {
        delay: Duration,
        max_retries: Option<usize>,
    },

    /// Custom retry schedule.
    ///
    /// The function receives the retry number (starting from 1) and returns
    /// the delay before that retry, or `None` to stop.
    Custom {
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl Default for RetryStrategy {
    /// Exponential backoff from one second, doubling, with no retry limit.
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: None,
            max_retries: None,
            jitter: false,
        }
    }
}

fn within(limit: Option<usize>, attempt: usize) -> bool {
    limit.map_or(true, |max| attempt <= max)
}

impl RetryStrategy {
    /// Returns the delay before the given retry, or `None` if retries are
    /// exhausted.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry number (1-indexed, so 1 = first retry)
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                multiplier,
                max_delay,
                max_retries,
                jitter,
            } => {
                if !within(*max_retries, attempt) {
                    return None;
                }

                let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                let factor = multiplier.saturating_pow(exponent);
                let mut delay = initial_delay.saturating_mul(factor);
                if let Some(max_delay) = max_delay {
                    delay = delay.min(*max_delay);
                }

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Fixed { delay, max_retries } => {
                within(*max_retries, attempt).then_some(*delay)
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }

    /// Returns the maximum number of retries, or `None` if unbounded.
    pub fn max_retries(&self) -> Option<usize> {
        match self {
            RetryStrategy::None => Some(0),
            RetryStrategy::ExponentialBackoff { max_retries, .. } => *max_retries,
            RetryStrategy::Fixed { max_retries, .. } => *max_retries,
            RetryStrategy::Custom { .. } => None,
        }
    }
}

/// Decides whether a failed attempt should be retried.
///
/// # Examples
///
/// ```
/// use netagent_client::{Error, RetryPredicate};
///
/// struct RetryOnUnauthorized;
///
/// impl RetryPredicate for RetryOnUnauthorized {
///     fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
///         error.agent_error().is_some_and(|e| e.is_unauthorized())
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Returns `true` if the attempt that produced `error` should be retried.
    ///
    /// `attempt` is the number of the failed attempt (1-indexed).
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

/// Retry transient transport failures only. The default.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTransport;

impl RetryPredicate for RetryOnTransport {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retry only on 5xx responses from the agent.
///
/// Not used by default: a 5xx is the agent's answer, and the stock policy
/// surfaces it immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl RetryPredicate for RetryOn5xx {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.agent_error().is_some_and(|e| e.is_server_error())
    }
}

/// Retry only on transport timeouts.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        match error {
            Error::Transport { source, .. } | Error::Body { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Retry only on connection failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Transport { source, .. } if source.is_connect())
    }
}

/// Retries if ANY of the predicates return `true`.
///
/// # Examples
///
/// ```
/// use netagent_client::retry::{OrPredicate, RetryOn5xx, RetryOnTransport};
///
/// let predicate = OrPredicate::new(vec![
///     Box::new(RetryOnTransport),
///     Box::new(RetryOn5xx),
/// ]);
/// ```
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(error, attempt))
    }
}

/// Retries only if ALL of the predicates return `true`.
///
/// # Examples
///
/// ```
/// use netagent_client::retry::{AndPredicate, RetryOn5xx, RetryPredicate};
/// use netagent_client::Error;
///
/// // Give a busy agent two more chances, then surface its answer.
/// struct FirstRetries(usize);
///
/// impl RetryPredicate for FirstRetries {
///     fn should_retry(&self, _error: &Error, attempt: usize) -> bool {
///         attempt <= self.0
///     }
/// }
///
/// let predicate = AndPredicate::new(vec![Box::new(RetryOn5xx), Box::new(FirstRetries(2))]);
/// ```
pub struct AndPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AndPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AndPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .all(|p| p.should_retry(error, attempt))
    }
}

/// A single boxed attempt of an operation.
pub type Attempt<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Runs an operation, repeating it as its policy allows.
///
/// Implementations must check `ctx` before each attempt and observe it
/// while cooling down, returning [`Error::Context`] once it is done.
#[async_trait]
pub trait Retry<T: Send + 'static>: Send + Sync {
    /// Runs `attempt` until it succeeds, fails for good, or `ctx` is done.
    async fn retry<'a>(
        &self,
        ctx: &Context,
        op: Operation,
        attempt: &(dyn Fn() -> Attempt<'a, T> + Send + Sync + 'a),
    ) -> Result<T>;
}

/// The stock [`Retry`]: a strategy for cooldowns and a predicate for
/// retryable failures.
pub struct Retrier {
    strategy: RetryStrategy,
    predicate: Box<dyn RetryPredicate>,
}

impl Retrier {
    pub fn new(strategy: RetryStrategy, predicate: Box<dyn RetryPredicate>) -> Self {
        Self {
            strategy,
            predicate,
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(RetryStrategy::default(), Box::new(RetryOnTransport))
    }
}

#[async_trait]
impl<T: Send + 'static> Retry<T> for Retrier {
    async fn retry<'a>(
        &self,
        ctx: &Context,
        op: Operation,
        attempt: &(dyn Fn() -> Attempt<'a, T> + Send + Sync + 'a),
    ) -> Result<T> {
        let mut attempts = 0;

        loop {
            if let Some(source) = ctx.err() {
                return Err(Error::Context { op, source });
            }

            attempts += 1;
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.predicate.should_retry(&error, attempts) {
                return Err(error);
            }

            let Some(delay) = self.strategy.delay_for_attempt(attempts) else {
                return Err(Error::MaxRetriesExceeded {
                    op,
                    attempts,
                    last_error: Box::new(error),
                });
            };
            let delay = ctx.remaining().map_or(delay, |remaining| delay.min(remaining));

            tracing::warn!(
                error = %error,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                operation = %op,
                "Attempt failed, retrying after delay"
            );

            ctx.sleep(delay)
                .await
                .map_err(|source| Error::Context { op, source })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentError, ContextError, ErrorSource};
    use bytes::Bytes;
    use http::StatusCode;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// A port nothing listens on, so connecting to it is refused.
    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn transport_error(port: u16) -> Error {
        let source = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{port}/"))
            .send()
            .await
            .unwrap_err();
        Error::Transport {
            op: Operation::JoinNetwork,
            source,
        }
    }

    fn fast_exponential(max_retries: Option<usize>) -> RetryStrategy {
        RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(10),
            multiplier: 2,
            max_delay: None,
            max_retries,
            jitter: false,
        }
    }

    fn agent_error(code: u16) -> Error {
        Error::Agent {
            op: Operation::GetNetworkConfiguration,
            source: AgentError {
                code: StatusCode::from_u16(code).unwrap(),
                error_source: ErrorSource::Agent,
                body: Bytes::new(),
            },
        }
    }

    struct FirstAttempts(usize);

    impl RetryPredicate for FirstAttempts {
        fn should_retry(&self, _error: &Error, attempt: usize) -> bool {
            attempt <= self.0
        }
    }

    #[test]
    fn test_and_predicate_requires_every_predicate() {
        let predicate = AndPredicate::new(vec![Box::new(RetryOn5xx), Box::new(FirstAttempts(2))]);
        let unavailable = agent_error(503);
        let not_found = agent_error(404);

        assert!(predicate.should_retry(&unavailable, 1));
        assert!(predicate.should_retry(&unavailable, 2));
        assert!(!predicate.should_retry(&unavailable, 3));
        assert!(!predicate.should_retry(&not_found, 1));
    }

    #[test]
    fn test_or_predicate_accepts_any_predicate() {
        let predicate = OrPredicate::new(vec![Box::new(RetryOn5xx), Box::new(FirstAttempts(1))]);
        let unavailable = agent_error(503);
        let not_found = agent_error(404);

        assert!(predicate.should_retry(&not_found, 1));
        assert!(!predicate.should_retry(&not_found, 2));
        assert!(predicate.should_retry(&unavailable, 5));
    }

    #[test]
    fn test_default_is_exponential_from_one_second() {
        let strategy = RetryStrategy::default();

        assert_eq!(strategy.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_secs(2)));
        assert_eq!(strategy.delay_for_attempt(3), Some(Duration::from_secs(4)));
        assert_eq!(strategy.delay_for_attempt(4), Some(Duration::from_secs(8)));
        assert_eq!(strategy.max_retries(), None);
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            multiplier: 3,
            max_delay: Some(Duration::from_secs(1)),
            max_retries: Some(4),
            jitter: false,
        };

        assert_eq!(strategy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_millis(300)));
        assert_eq!(strategy.delay_for_attempt(3), Some(Duration::from_millis(900)));
        assert_eq!(strategy.delay_for_attempt(4), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(5), None);
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let strategy = RetryStrategy::default();
        assert!(strategy.delay_for_attempt(10_000).is_some());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: None,
            max_retries: None,
            jitter: true,
        };

        for _ in 0..50 {
            let delay = strategy.delay_for_attempt(2).unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_fixed_and_none() {
        let strategy = RetryStrategy::Fixed {
            delay: Duration::from_secs(1),
            max_retries: Some(2),
        };
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(3), None);

        assert_eq!(RetryStrategy::None.delay_for_attempt(1), None);
        assert_eq!(RetryStrategy::None.max_retries(), Some(0));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let err = transport_error(closed_port()).await;
        assert!(err.is_retryable());
        assert!(RetryOnConnectionError.should_retry(&err, 1));
        assert!(!RetryOnTimeout.should_retry(&err, 1));
        assert!(!RetryOn5xx.should_retry(&err, 1));
    }

    #[tokio::test]
    async fn test_succeeds_after_transport_failures() {
        let port = closed_port();
        let calls = AtomicUsize::new(0);
        let retrier = Retrier::new(fast_exponential(None), Box::new(RetryOnTransport));
        let ctx = Context::background().with_timeout(Duration::from_secs(30));
        let start = Instant::now();

        let counter = &calls;
        let attempt = move || {
            let fut: Attempt<'_, usize> = Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 3 {
                    Err(transport_error(port).await)
                } else {
                    Ok(n)
                }
            });
            fut
        };
        let result = retrier.retry(&ctx, Operation::JoinNetwork, &attempt).await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 10ms + 20ms + 40ms of cooldown
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_cancelled_context_makes_no_attempts() {
        let calls = AtomicUsize::new(0);
        let retrier = Retrier::default();
        let ctx = Context::background();
        ctx.cancel();

        let counter = &calls;
        let attempt = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let fut: Attempt<'static, ()> = Box::pin(async { Ok(()) });
            fut
        };
        let result = retrier.retry(&ctx, Operation::JoinNetwork, &attempt).await;

        assert_eq!(result.unwrap_err().context_error(), Some(ContextError::Canceled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let calls = AtomicUsize::new(0);
        let retrier = Retrier::default();
        let ctx = Context::background();

        let counter = &calls;
        let attempt = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let fut: Attempt<'static, ()> = Box::pin(async {
                Err(Error::Content {
                    op: Operation::GetNetworkConfiguration,
                    source: crate::ContentError {
                        content_type: "text/plain".to_string(),
                        body: bytes::Bytes::new(),
                        content_length: Some(0),
                    },
                })
            });
            fut
        };
        let result = retrier
            .retry(&ctx, Operation::GetNetworkConfiguration, &attempt)
            .await;

        assert!(result.unwrap_err().content_error().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded_keeps_last_error() {
        let port = closed_port();
        let retrier = Retrier::new(fast_exponential(Some(2)), Box::new(RetryOnTransport));
        let ctx = Context::background();

        let attempt = move || {
            let fut: Attempt<'static, ()> =
                Box::pin(async move { Err(transport_error(port).await) });
            fut
        };
        let result = retrier.retry(&ctx, Operation::JoinNetwork, &attempt).await;

        match result {
            Err(Error::MaxRetriesExceeded {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.is_retryable());
            }
            other => panic!("Expected MaxRetriesExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cooldown_is_bounded_by_deadline() {
        let port = closed_port();
        let retrier = Retrier::default();
        let ctx = Context::background().with_timeout(Duration::from_millis(300));
        let start = Instant::now();

        let attempt = move || {
            let fut: Attempt<'static, ()> =
                Box::pin(async move { Err(transport_error(port).await) });
            fut
        };
        let result = retrier.retry(&ctx, Operation::JoinNetwork, &attempt).await;

        assert_eq!(
            result.unwrap_err().context_error(),
            Some(ContextError::DeadlineExceeded)
        );
        // The 1s cooldown was cut short by the deadline.
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
