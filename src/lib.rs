#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # birdhouse
//!
//! Admission control and failure classification for a REST gateway in front of a
//! social-platform client.
//!
//! ## Features
//!
//! - **Sliding-window rate limiting** with independent per-minute and per-hour budgets
//! - **Failure classification** into a closed seven-category taxonomy with per-category counters
//! - **Upstream retry** with exponential backoff for rate-limited calls, plus request pacing
//! - **Tower middleware** so admission control composes with any `tower::Service`
//! - **Telemetry** as `tower::Service<GatewayEvent>` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use birdhouse::{ErrorCategory, ErrorHandler, FailureInfo, RateLimiter};
//!
//! let limiter = RateLimiter::new(2, 5).unwrap();
//! assert!(limiter.allow_request());
//! assert!(limiter.allow_request());
//! assert!(!limiter.allow_request());
//!
//! let errors = ErrorHandler::new();
//! let record = errors.format_error(&FailureInfo::from_message("Rate limit exceeded"));
//! assert_eq!(record.category, ErrorCategory::RateLimit);
//! ```

pub mod backoff;
pub mod classify;
pub mod clock;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod sleeper;
pub mod telemetry;
pub mod upstream;
pub mod validation;

// Re-exports
pub use backoff::Backoff;
pub use classify::{ErrorCategory, ErrorHandler, ErrorRecord, ErrorStats, Failure, FailureInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::GatewayError;
pub use rate_limit::{Decision, RateLimitLayer, RateLimitStats, RateLimiter, Window};
pub use retry::{UpstreamPolicy, UpstreamPolicyBuilder};
pub use session::{Session, SessionStore};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use upstream::{SandboxClient, SocialClient, UpstreamError};
