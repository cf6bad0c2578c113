//! Error type shared by the admission middleware and the upstream retry policy.
use crate::classify::Failure;
use crate::rate_limit::Window;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
/// Outcome of a guarded call that did not produce a response.
#[derive(Debug, Clone)]
pub enum GatewayError<E> {
    /// The limiter rejected the call before it reached the inner service
    RateLimited { window: Window, retry_after: Duration },
    /// Every retry of a rate-limited upstream call failed
    RetryExhausted { attempts: usize, last: E },
    /// The underlying operation failed
    Inner(E),
}
impl<E: fmt::Display> fmt::Display for GatewayError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { window, retry_after } => {
                write!(
                    f,
                    "Rate limit exceeded ({} window). Try again in {}s.",
                    window,
                    retry_after_secs(*retry_after)
                )
            }
            Self::RetryExhausted { attempts, last } => {
                write!(f, "retry exhausted after {} attempts; last error: {}", attempts, last)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}
impl<E: std::error::Error + 'static> std::error::Error for GatewayError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) | Self::RetryExhausted { last: e, .. } => Some(e),
            Self::RateLimited { .. } => None,
        }
    }
}
impl<E: Failure + fmt::Display> Failure for GatewayError<E> {
    fn kind(&self) -> Cow<'_, str> {
        match self {
            Self::RateLimited { .. } => Cow::Borrowed("RateLimited"),
            Self::RetryExhausted { .. } => Cow::Borrowed("RetryExhausted"),
            Self::Inner(e) => e.kind(),
        }
    }
    fn message(&self) -> String {
        match self {
            Self::Inner(e) => e.message(),
            other => other.to_string(),
        }
    }
    fn signals_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::RetryExhausted { .. } => true,
            Self::Inner(e) => e.signals_rate_limit(),
        }
    }
}
/// Whole seconds to wait, rounded up so a client never retries early.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
impl<E> GatewayError<E> {
    /// Check if the limiter rejected the call
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
    /// Check if this error is due to retry exhaustion
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Suggested wait for a rate-limit rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
    /// Access retry exhaustion info as (attempts, last failure).
    pub fn retry_exhausted_info(&self) -> Option<(usize, &E)> {
        match self {
            Self::RetryExhausted { attempts, last } => Some((*attempts, last)),
            _ => None,
        }
    }
}
