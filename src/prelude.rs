//! Convenient re-exports for common birdhouse types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    classify::{ErrorCategory, ErrorHandler, ErrorRecord, ErrorStats, Failure, FailureInfo},
    clock::{Clock, ManualClock, SystemClock},
    rate_limit::{
        Decision, LimiterConfigError, RateLimitLayer, RateLimitService, RateLimitStats, RateLimiter,
        Window,
    },
    retry::{UpstreamPolicy, UpstreamPolicyBuilder},
    telemetry::{EventEmitter, GatewayEvent, MemorySink},
    upstream::{Credentials, PostDraft, SearchQuery, SocialClient, UpstreamError, UserRef},
    GatewayError,
};
