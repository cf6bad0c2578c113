//! Sliding-window admission control.
//!
//! [`RateLimiter`] tracks two independent rolling windows (the last 60 seconds and the last
//! 3600 seconds) and admits an operation only while both are below their limits. A denied
//! call leaves no trace in either window; an admitted call records exactly one timestamp in
//! each.
//!
//! - [`RateLimiter`]: the limiter itself, shared by `Arc` across request tasks.
//! - [`RateLimitLayer`]: tower middleware that consults a limiter before every call.
//! - [`Decision`]: the result of a check (`Allowed`/`Denied`).
//!
//! ```rust
//! use birdhouse::clock::ManualClock;
//! use birdhouse::rate_limit::RateLimiter;
//!
//! let clock = ManualClock::new();
//! let limiter = RateLimiter::with_clock(2, 5, clock.clone()).unwrap();
//! assert!(limiter.allow_request());
//! assert!(limiter.allow_request());
//! assert!(!limiter.allow_request());
//!
//! clock.advance(60_001);
//! assert!(limiter.allow_request());
//! assert_eq!(limiter.stats().requests_last_hour, 3);
//! ```

use crate::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub mod middleware;
mod window;

pub use middleware::{RateLimitLayer, RateLimitService};
use window::BoundedWindow;

/// Default per-minute budget.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;
/// Default per-hour budget.
pub const DEFAULT_REQUESTS_PER_HOUR: u32 = 500;

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;

/// Which rolling window a decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Minute,
    Hour,
}

impl Window {
    pub fn as_str(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
        }
    }

    fn span_millis(self) -> u64 {
        match self {
            Window::Minute => MINUTE_MS,
            Window::Hour => HOUR_MS,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision returned by [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The operation was admitted and recorded.
    Allowed {
        /// Admissions left in the minute window after this one.
        minute_remaining: u32,
        /// Admissions left in the hour window after this one.
        hour_remaining: u32,
    },
    /// The operation was rejected; nothing was recorded.
    Denied {
        /// The window whose limit was reached (minute is checked first).
        window: Window,
        /// Time until that window's oldest entry expires.
        /// Useful for `Retry-After` headers.
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Point-in-time view of both windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub requests_last_minute: u32,
    pub requests_last_hour: u32,
    pub minute_limit: u32,
    pub hour_limit: u32,
}

/// Rejected limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimiterConfigError {
    #[error("{0} limit must be greater than zero")]
    ZeroLimit(Window),
}

#[derive(Debug)]
struct Windows {
    minute: BoundedWindow,
    hour: BoundedWindow,
}

/// Two-window sliding rate limiter.
///
/// Check-and-record runs under one mutex, so concurrent callers can never both take the last
/// slot. A poisoned mutex is recovered rather than propagated: the windows hold plain
/// timestamps and are always in a consistent state between statements.
#[derive(Debug)]
pub struct RateLimiter {
    rpm_limit: u32,
    rph_limit: u32,
    windows: Mutex<Windows>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::build(DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_REQUESTS_PER_HOUR, Arc::new(SystemClock))
    }
}

impl RateLimiter {
    /// Limiter on the wall clock.
    pub fn new(requests_per_minute: u32, requests_per_hour: u32) -> Result<Self, LimiterConfigError> {
        Self::with_clock(requests_per_minute, requests_per_hour, SystemClock)
    }

    /// Limiter driven by an explicit clock.
    pub fn with_clock<C>(
        requests_per_minute: u32,
        requests_per_hour: u32,
        clock: C,
    ) -> Result<Self, LimiterConfigError>
    where
        C: Clock + 'static,
    {
        if requests_per_minute == 0 {
            return Err(LimiterConfigError::ZeroLimit(Window::Minute));
        }
        if requests_per_hour == 0 {
            return Err(LimiterConfigError::ZeroLimit(Window::Hour));
        }
        Ok(Self::build(requests_per_minute, requests_per_hour, Arc::new(clock)))
    }

    fn build(rpm_limit: u32, rph_limit: u32, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(
            requests_per_minute = rpm_limit,
            requests_per_hour = rph_limit,
            "rate limiter initialized"
        );
        Self {
            rpm_limit,
            rph_limit,
            windows: Mutex::new(Windows {
                minute: BoundedWindow::new(rpm_limit as usize),
                hour: BoundedWindow::new(rph_limit as usize),
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit or reject one operation.
    pub fn allow_request(&self) -> bool {
        self.check().is_allowed()
    }

    /// Admit or reject one operation, reporting why.
    pub fn check(&self) -> Decision {
        let now = self.clock.now_millis();
        let mut w = self.lock();
        w.minute.evict_older_than(now.saturating_sub(MINUTE_MS));
        w.hour.evict_older_than(now.saturating_sub(HOUR_MS));

        let minute_count = w.minute.len();
        let hour_count = w.hour.len();
        let denied = if minute_count >= self.rpm_limit as usize {
            Some((Window::Minute, w.minute.oldest(), minute_count, self.rpm_limit))
        } else if hour_count >= self.rph_limit as usize {
            Some((Window::Hour, w.hour.oldest(), hour_count, self.rph_limit))
        } else {
            None
        };

        if let Some((window, oldest, count, limit)) = denied {
            drop(w);
            let retry_after = retry_after(oldest, window, now);
            tracing::warn!(
                window = %window,
                count,
                limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            return Decision::Denied { window, retry_after };
        }

        w.minute.push(now);
        w.hour.push(now);
        Decision::Allowed {
            minute_remaining: self.rpm_limit - (minute_count as u32 + 1),
            hour_remaining: self.rph_limit - (hour_count as u32 + 1),
        }
    }

    /// Current window occupancy. Reads only; stale entries are skipped, not evicted.
    pub fn stats(&self) -> RateLimitStats {
        let now = self.clock.now_millis();
        let w = self.lock();
        RateLimitStats {
            requests_last_minute: w.minute.count_since(now.saturating_sub(MINUTE_MS)) as u32,
            requests_last_hour: w.hour.count_since(now.saturating_sub(HOUR_MS)) as u32,
            minute_limit: self.rpm_limit,
            hour_limit: self.rph_limit,
        }
    }

    /// Forget every recorded admission.
    pub fn reset(&self) {
        let mut w = self.lock();
        w.minute.clear();
        w.hour.clear();
        tracing::info!("rate limiter reset");
    }

    pub fn minute_limit(&self) -> u32 {
        self.rpm_limit
    }

    pub fn hour_limit(&self) -> u32 {
        self.rph_limit
    }
}

// An entry stamped `ts` stays in the window while `ts >= now - span`, so it first falls out
// at `ts + span + 1`.
fn retry_after(oldest: Option<u64>, window: Window, now: u64) -> Duration {
    oldest
        .map(|ts| Duration::from_millis((ts + window.span_millis() + 1).saturating_sub(now)))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(rpm: u32, rph: u32) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::starting_at(1_000_000);
        (RateLimiter::with_clock(rpm, rph, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert_eq!(
            RateLimiter::new(0, 10).unwrap_err(),
            LimiterConfigError::ZeroLimit(Window::Minute)
        );
        assert_eq!(RateLimiter::new(10, 0).unwrap_err(), LimiterConfigError::ZeroLimit(Window::Hour));
    }

    #[test]
    fn allowed_reports_remaining() {
        let (limiter, _) = limiter(3, 10);
        assert_eq!(limiter.check(), Decision::Allowed { minute_remaining: 2, hour_remaining: 9 });
        assert_eq!(limiter.check(), Decision::Allowed { minute_remaining: 1, hour_remaining: 8 });
    }

    #[test]
    fn denial_reports_window_and_retry_after() {
        let (limiter, clock) = limiter(1, 10);
        assert!(limiter.allow_request());
        clock.advance(10_000);
        match limiter.check() {
            Decision::Denied { window, retry_after } => {
                assert_eq!(window, Window::Minute);
                assert_eq!(retry_after, Duration::from_millis(50_001));
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn entry_exactly_at_boundary_still_counts() {
        let (limiter, clock) = limiter(1, 10);
        assert!(limiter.allow_request());
        clock.advance(MINUTE_MS);
        assert!(!limiter.allow_request());
        clock.advance(1);
        assert!(limiter.allow_request());
    }

    #[test]
    fn minute_is_checked_before_hour() {
        let (limiter, _) = limiter(1, 1);
        assert!(limiter.allow_request());
        assert!(matches!(limiter.check(), Decision::Denied { window: Window::Minute, .. }));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let (limiter, _) = limiter(5, 10);
        let limiter = Arc::new(limiter);
        let poisoner = limiter.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.windows.lock().unwrap();
            panic!("poison the limiter");
        })
        .join();
        assert!(limiter.windows.is_poisoned());
        assert!(limiter.allow_request());
        assert_eq!(limiter.stats().requests_last_minute, 1);
    }

    #[test]
    fn default_uses_documented_limits() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.minute_limit(), DEFAULT_REQUESTS_PER_MINUTE);
        assert_eq!(limiter.hour_limit(), DEFAULT_REQUESTS_PER_HOUR);
    }
}
