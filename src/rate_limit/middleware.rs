use crate::rate_limit::{Decision, RateLimiter};
use crate::telemetry::{AdmissionEvent, EventEmitter, GatewayEvent};
use crate::GatewayError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that asks a shared [`RateLimiter`] for admission before every call.
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    events: EventEmitter,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter, events: EventEmitter::null() }
    }

    /// Emit an [`AdmissionEvent`] for every decision.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            events: self.events.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
///
/// Denied calls never reach the inner service and never touch the limiter's windows.
#[derive(Clone, Debug)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    events: EventEmitter,
}

impl<S, Req> Service<Req> for RateLimitService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = GatewayError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GatewayError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // The ready clone goes into the future; the fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let decision = self.limiter.check();
        let events = self.events.clone();

        Box::pin(async move {
            match decision {
                Decision::Allowed { minute_remaining, hour_remaining } => {
                    events
                        .emit(GatewayEvent::Admission(AdmissionEvent::Admitted {
                            minute_remaining,
                            hour_remaining,
                        }))
                        .await;
                    inner.call(req).await.map_err(GatewayError::Inner)
                }
                Decision::Denied { window, retry_after } => {
                    events
                        .emit(GatewayEvent::Admission(AdmissionEvent::Denied { window, retry_after }))
                        .await;
                    Err(GatewayError::RateLimited { window, retry_after })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::Window;
    use crate::telemetry::MemorySink;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn denial_short_circuits_inner_service() {
        let limiter = Arc::new(RateLimiter::with_clock(1, 10, ManualClock::new()).unwrap());
        let sink = MemorySink::new();
        let layer = RateLimitLayer::new(limiter.clone()).with_events(EventEmitter::new(sink.clone()));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = calls.clone();
        let svc = layer.layer(service_fn(move |req: u32| {
            counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok::<_, Infallible>(req * 2) }
        }));

        assert_eq!(svc.clone().oneshot(21).await.unwrap(), 42);
        let err = svc.oneshot(1).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { window: Window::Minute, .. }));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(limiter.stats().requests_last_minute, 1);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], GatewayEvent::Admission(AdmissionEvent::Admitted { .. })));
        assert!(matches!(events[1], GatewayEvent::Admission(AdmissionEvent::Denied { .. })));
    }
}
