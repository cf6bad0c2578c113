//! Exponential backoff for upstream retries.
//!
//! Attempt semantics: attempt `0` is the initial call (no delay) and retries start at
//! `attempt = 1`, which waits exactly `base`. Each further retry doubles the wait.
//!
//! ```rust
//! use std::time::Duration;
//! use birdhouse::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(60));
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_secs(60));
//! assert_eq!(backoff.delay(3), Duration::from_secs(240));
//!
//! let capped = backoff.with_max(Duration::from_secs(90)).unwrap();
//! assert_eq!(capped.delay(3), Duration::from_secs(90));
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`] (1 day).

use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Doubling delay with an optional ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    /// `base`, `2 * base`, `4 * base`, ...
    pub fn exponential(base: Duration) -> Self {
        Self { base, max: None }
    }

    /// Cap every delay at `max`. Fails if `max` is zero or below `base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Delay before the given attempt (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
        let multiplier = 2u128.saturating_pow(exponent);
        let nanos = self.base.as_nanos().saturating_mul(multiplier);
        let delay = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
        let capped = self.max.map(|m| delay.min(m)).unwrap_or(delay);
        capped.min(MAX_BACKOFF)
    }
}

impl Default for Backoff {
    /// One minute, doubling, uncapped.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(60))
    }
}
