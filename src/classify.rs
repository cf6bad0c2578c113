//! Failure classification and structured error records.
//!
//! Every failure that reaches the gateway is mapped onto a closed, seven-member taxonomy
//! ([`ErrorCategory`]) by matching the lower-cased failure message against an ordered rule
//! table. The first rule with a matching keyword wins; a message that matches nothing is
//! [`ErrorCategory::Internal`]. Classification is total: it never panics and never fails.
//!
//! [`ErrorHandler`] wraps the classifier with per-category counters and produces the
//! [`ErrorRecord`] payload returned to callers.
//!
//! ```rust
//! use birdhouse::classify::{ErrorCategory, ErrorHandler, FailureInfo};
//!
//! let handler = ErrorHandler::new();
//! let failure = FailureInfo::from_message("Unauthorized access");
//! assert_eq!(handler.categorize_error(&failure), ErrorCategory::Auth);
//!
//! let record = handler.format_error(&failure);
//! assert_eq!(record.message, "Unauthorized access");
//! assert_eq!(handler.error_stats().get(ErrorCategory::Auth), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Closed failure taxonomy, declared in rule-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    NotFound,
    Validation,
    Network,
    /// The wrapped platform reported a failure of its own.
    Upstream,
    /// Fallback when no rule matches.
    Internal,
}

impl ErrorCategory {
    /// Number of taxonomy members.
    pub const COUNT: usize = 7;

    /// Every category, in rule-priority order.
    pub const ALL: [ErrorCategory; Self::COUNT] = [
        ErrorCategory::Auth,
        ErrorCategory::RateLimit,
        ErrorCategory::NotFound,
        ErrorCategory::Validation,
        ErrorCategory::Network,
        ErrorCategory::Upstream,
        ErrorCategory::Internal,
    ];

    /// Wire name (`"AUTH"`, `"RATE_LIMIT"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Upstream => "UPSTREAM",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    /// Static human-readable label.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "Authentication error",
            ErrorCategory::RateLimit => "Rate limit exceeded",
            ErrorCategory::NotFound => "Resource not found",
            ErrorCategory::Validation => "Validation error",
            ErrorCategory::Network => "Network error",
            ErrorCategory::Upstream => "Upstream service error",
            ErrorCategory::Internal => "Internal server error",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered rule table; evaluated top-down against the lower-cased message.
const RULES: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Auth, &["auth", "unauthorized"]),
    (ErrorCategory::RateLimit, &["rate", "too many"]),
    (ErrorCategory::NotFound, &["not found", "404"]),
    (ErrorCategory::Validation, &["validation", "invalid"]),
    (ErrorCategory::Network, &["network", "connection"]),
    (ErrorCategory::Upstream, &["twitter", "upstream"]),
];

/// Classify a raw failure message.
pub fn categorize_message(message: &str) -> ErrorCategory {
    let lowered = message.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Internal)
}

/// A failure the classifier can inspect: a kind name plus a human-readable message.
pub trait Failure {
    /// Name of the failure kind (e.g. `"RateLimited"`, `"io::Error"`).
    fn kind(&self) -> Cow<'_, str>;
    /// Human-readable failure text; this is what classification matches against.
    fn message(&self) -> String;
    /// Whether the failure kind is an upstream rate-limit signal. Retry decisions use this,
    /// never the message text.
    fn signals_rate_limit(&self) -> bool {
        false
    }
}

/// Plain kind + message failure, for errors that do not implement [`Failure`] themselves.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
}

impl FailureInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }

    /// Failure carrying only a message; the kind is reported as `"Error"`.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    /// Capture any standard error, using its short type name as the kind.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::new(short_type_name::<E>(), err.to_string())
    }
}

impl Failure for FailureInfo {
    fn kind(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.kind)
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn signals_rate_limit(&self) -> bool {
        matches!(self.kind.as_str(), "RateLimited" | "TooManyRequests")
    }
}

fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Structured, loggable description of a classified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Always `true`; lets clients branch on a single field.
    pub error: bool,
    pub category: ErrorCategory,
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of per-category counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorStats(BTreeMap<ErrorCategory, u64>);

impl ErrorStats {
    /// Count for one category; every category is always present.
    pub fn get(&self, category: ErrorCategory) -> u64 {
        self.0.get(&category).copied().unwrap_or(0)
    }

    /// Sum over all categories.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ErrorCategory, u64)> + '_ {
        self.0.iter().map(|(c, n)| (*c, *n))
    }
}

/// Classifier with per-category counters.
///
/// Counters are independent atomics, so concurrent `format_error` calls never lose an
/// increment. A snapshot taken while other threads classify may mix before/after values
/// across categories, but each individual counter is exact.
#[derive(Debug)]
pub struct ErrorHandler {
    counts: [AtomicU64; ErrorCategory::COUNT],
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    pub fn new() -> Self {
        tracing::info!("error handler initialized");
        Self { counts: std::array::from_fn(|_| AtomicU64::new(0)) }
    }

    /// Pure classification; does not touch the counters.
    pub fn categorize_error<F: Failure + ?Sized>(&self, failure: &F) -> ErrorCategory {
        categorize_message(&failure.message())
    }

    /// Classify, count, and build the record returned to the caller.
    pub fn format_error<F: Failure + ?Sized>(&self, failure: &F) -> ErrorRecord {
        let message = failure.message();
        let category = categorize_message(&message);
        self.counts[category.index()].fetch_add(1, Ordering::Relaxed);

        let error_type = failure.kind().into_owned();
        tracing::error!(
            category = %category,
            error_type = %error_type,
            message = %message,
            "request failed"
        );

        ErrorRecord {
            error: true,
            category,
            error_type,
            message,
            description: category.description().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Copy of the current counters.
    pub fn error_stats(&self) -> ErrorStats {
        ErrorStats(
            ErrorCategory::ALL
                .iter()
                .map(|c| (*c, self.counts[c.index()].load(Ordering::Relaxed)))
                .collect(),
        )
    }

    /// Zero every counter.
    pub fn reset_stats(&self) {
        for counter in &self.counts {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
