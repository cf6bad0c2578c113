//! HTTP gateway over a [`SocialClient`].
//!
//! Platform routes sit behind the shared [`RateLimiter`] (the stats routes do not); upstream calls go through the
//! [`UpstreamPolicy`] for pacing and rate-limit retries, and every failure is classified by
//! the [`ErrorHandler`] before it is returned.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;

pub use api::router;
pub use config::{ConfigError, GatewayConfig};
pub use error::ApiError;

use birdhouse::telemetry::{EventEmitter, FailureEvent, GatewayEvent};
use birdhouse::{ErrorHandler, Failure, RateLimiter, SocialClient, UpstreamError, UpstreamPolicy};
use std::future::Future;
use std::sync::Arc;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn SocialClient>,
    pub limiter: Arc<RateLimiter>,
    pub errors: Arc<ErrorHandler>,
    pub policy: UpstreamPolicy,
    pub events: EventEmitter,
}

impl AppState {
    pub fn new(
        client: Arc<dyn SocialClient>,
        limiter: Arc<RateLimiter>,
        policy: UpstreamPolicy,
        events: EventEmitter,
    ) -> Self {
        Self { client, limiter, errors: Arc::new(ErrorHandler::new()), policy, events }
    }

    /// Wire a state from configuration.
    pub fn from_config(
        config: &GatewayConfig,
        client: Arc<dyn SocialClient>,
        events: EventEmitter,
    ) -> Result<Self, ConfigError> {
        let limiter = Arc::new(config.rate_limiter()?);
        let policy = config.upstream_policy(events.clone())?;
        Ok(Self::new(client, limiter, policy, events))
    }

    /// Classify and count a failure, and emit it as telemetry.
    pub async fn reject<F: Failure + ?Sized>(&self, failure: &F) -> ApiError {
        let record = self.errors.format_error(failure);
        self.events.emit(GatewayEvent::Failure(FailureEvent::from(&record))).await;
        ApiError(record)
    }

    /// Run an upstream call under the pacing and retry policy.
    pub async fn upstream<T, Fut, Op>(&self, operation: Op) -> Result<T, ApiError>
    where
        Fut: Future<Output = Result<T, UpstreamError>>,
        Op: FnMut() -> Fut,
    {
        match self.policy.execute(operation).await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.reject(&err).await),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("client", &self.client)
            .field("limiter", &self.limiter)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
