use crate::classify::{ErrorCategory, ErrorRecord};
use crate::rate_limit::Window;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted while handling gateway requests.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Limiter decisions
    Admission(AdmissionEvent),
    /// Upstream retry activity
    Retry(RetryEvent),
    /// A request failed and was classified
    Failure(FailureEvent),
}

/// Events emitted by the admission middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The request was admitted and recorded in both windows.
    Admitted { minute_remaining: u32, hour_remaining: u32 },
    /// The request was rejected before reaching the inner service.
    Denied { window: Window, retry_after: Duration },
}

/// Events emitted by the upstream retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry attempt is about to be made.
    ///
    /// Emitted before sleeping and retrying a rate-limited upstream call.
    Attempt {
        /// The retry number (1-indexed)
        attempt: usize,
        /// The backoff delay before this retry
        delay: Duration,
    },
    /// All retries were used up and the call still failed.
    Exhausted {
        /// Total number of calls made, including the first
        total_attempts: usize,
        /// Total time spent sleeping between attempts
        total_duration: Duration,
    },
}

/// A classified failure, minus the timestamp (sinks stamp their own).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEvent {
    pub category: ErrorCategory,
    pub error_type: String,
    pub message: String,
}

impl From<&ErrorRecord> for FailureEvent {
    fn from(record: &ErrorRecord) -> Self {
        Self {
            category: record.category,
            error_type: record.error_type.clone(),
            message: record.message.clone(),
        }
    }
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEvent::Admission(event) => write!(f, "Admission::{}", event),
            GatewayEvent::Retry(event) => write!(f, "Retry::{}", event),
            GatewayEvent::Failure(event) => write!(f, "Failure::{}", event),
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { minute_remaining, hour_remaining } => {
                write!(f, "Admitted(minute_remaining={}, hour_remaining={})", minute_remaining, hour_remaining)
            }
            AdmissionEvent::Denied { window, retry_after } => {
                write!(f, "Denied(window={}, retry_after={:?})", window, retry_after)
            }
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
        }
    }
}

impl fmt::Display for FailureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}: {})", self.category, self.error_type, self.message)
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a GatewayEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &GatewayEvent) -> serde_json::Value {
    match event {
        GatewayEvent::Admission(a) => match a {
            AdmissionEvent::Admitted { minute_remaining, hour_remaining } => json!({
                "kind": "admitted",
                "minute_remaining": *minute_remaining,
                "hour_remaining": *hour_remaining,
            }),
            AdmissionEvent::Denied { window, retry_after } => json!({
                "kind": "denied",
                "window": window.as_str(),
                "retry_after_ms": clamp_u64(retry_after.as_millis()),
            }),
        },
        GatewayEvent::Retry(r) => match r {
            RetryEvent::Attempt { attempt, delay } => json!({
                "kind": "retry_attempt",
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
            RetryEvent::Exhausted { total_attempts, total_duration } => json!({
                "kind": "retry_exhausted",
                "attempts": *total_attempts,
                "duration_ms": clamp_u64(total_duration.as_millis()),
            }),
        },
        GatewayEvent::Failure(e) => json!({
            "kind": "failure",
            "category": e.category.as_str(),
            "type": e.error_type,
            "message": e.message,
        }),
    }
}
