//! Upstream call policy: request pacing plus rate-limit retries.
//!
//! Semantics:
//! - Every attempt counts as one upstream call. After every `pace_every` calls the policy
//!   pauses for `pace_pause` before making the next one (`pace_every = 0` disables pacing).
//! - Only failures whose kind signals a rate limit ([`Failure::signals_rate_limit`]) are
//!   retried; anything else is returned at once as `GatewayError::Inner`, whatever its text says.
//! - Retry `n` (1-indexed) first sleeps `backoff.delay(n)`, so with the default one-minute base
//!   the waits are 60 s, 120 s and 240 s.
//! - When `max_retries` retries have all failed the policy returns
//!   `GatewayError::RetryExhausted` carrying the final failure.
//!
//! Sleeping goes through [`Sleeper`], so tests can inject `InstantSleeper`/`TrackingSleeper`.
//!
//! ```rust
//! use birdhouse::{GatewayError, TrackingSleeper, UpstreamError, UpstreamPolicy};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let sleeper = TrackingSleeper::new();
//! let policy = UpstreamPolicy::builder().with_sleeper(sleeper.clone()).build();
//!
//! let result: Result<(), _> = policy
//!     .execute(|| async { Err(UpstreamError::RateLimited("slow down".into())) })
//!     .await;
//!
//! assert!(matches!(result, Err(GatewayError::RetryExhausted { attempts: 4, .. })));
//! assert_eq!(sleeper.total(), Duration::from_secs(60 + 120 + 240));
//! # });
//! ```

use crate::classify::Failure;
use crate::telemetry::{EventEmitter, GatewayEvent, RetryEvent};
use crate::{Backoff, GatewayError, Sleeper, TokioSleeper};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default number of retries after the first rate-limited attempt.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default number of upstream calls between pacing pauses.
pub const DEFAULT_PACE_EVERY: u64 = 100;
/// Default pacing pause.
pub const DEFAULT_PACE_PAUSE: Duration = Duration::from_secs(2);

/// Pacing and retry wrapper for upstream calls.
///
/// Clones share the call counter, so pacing is global to the process however many handler
/// tasks hold a copy.
#[derive(Clone)]
pub struct UpstreamPolicy {
    max_retries: usize,
    backoff: Backoff,
    pace_every: u64,
    pace_pause: Duration,
    calls: Arc<AtomicU64>,
    sleeper: Arc<dyn Sleeper>,
    events: EventEmitter,
}

impl fmt::Debug for UpstreamPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("pace_every", &self.pace_every)
            .field("pace_pause", &self.pace_pause)
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl Default for UpstreamPolicy {
    fn default() -> Self {
        UpstreamPolicyBuilder::new().build()
    }
}

impl UpstreamPolicy {
    /// Construct a new builder with defaults.
    pub fn builder() -> UpstreamPolicyBuilder {
        UpstreamPolicyBuilder::new()
    }

    /// Upstream calls made through this policy (and its clones) so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    async fn pace(&self) {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.pace_every > 0 && n % self.pace_every == 0 {
            tracing::info!(calls = n, pause_ms = self.pace_pause.as_millis() as u64, "pacing upstream calls");
            self.sleeper.sleep(self.pace_pause).await;
        }
    }

    /// Run an upstream operation under pacing and rate-limit retry.
    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, GatewayError<E>>
    where
        E: Failure,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let mut retries = 0usize;
        let mut slept = Duration::ZERO;

        loop {
            self.pace().await;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.signals_rate_limit() {
                return Err(GatewayError::Inner(err));
            }

            if retries >= self.max_retries {
                if retries == 0 {
                    return Err(GatewayError::Inner(err));
                }
                let attempts = retries + 1;
                tracing::warn!(attempts, slept_ms = slept.as_millis() as u64, "upstream retries exhausted");
                self.events
                    .emit(GatewayEvent::Retry(RetryEvent::Exhausted {
                        total_attempts: attempts,
                        total_duration: slept,
                    }))
                    .await;
                return Err(GatewayError::RetryExhausted { attempts, last: err });
            }

            retries += 1;
            let delay = self.backoff.delay(retries);
            tracing::warn!(
                retry = retries,
                max_retries = self.max_retries,
                delay_secs = delay.as_secs(),
                "upstream rate limited; backing off"
            );
            self.events
                .emit(GatewayEvent::Retry(RetryEvent::Attempt { attempt: retries, delay }))
                .await;
            self.sleeper.sleep(delay).await;
            slept += delay;
        }
    }
}

/// Builder for [`UpstreamPolicy`].
pub struct UpstreamPolicyBuilder {
    max_retries: usize,
    backoff: Backoff,
    pace_every: u64,
    pace_pause: Duration,
    sleeper: Arc<dyn Sleeper>,
    events: EventEmitter,
}

impl UpstreamPolicyBuilder {
    /// Three retries, one-minute doubling backoff, a 2 s pause every 100 calls.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            pace_every: DEFAULT_PACE_EVERY,
            pace_pause: DEFAULT_PACE_PAUSE,
            sleeper: Arc::new(TokioSleeper),
            events: EventEmitter::null(),
        }
    }

    /// Retries after the first attempt; `0` disables retry.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Pause for `pause` after every `every` calls; `every = 0` disables pacing.
    pub fn pacing(mut self, every: u64, pause: Duration) -> Self {
        self.pace_every = every;
        self.pace_pause = pause;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> UpstreamPolicy {
        UpstreamPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            pace_every: self.pace_every,
            pace_pause: self.pace_pause,
            calls: Arc::new(AtomicU64::new(0)),
            sleeper: self.sleeper,
            events: self.events,
        }
    }
}

impl Default for UpstreamPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
