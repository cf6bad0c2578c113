//! Telemetry for the gateway.
//!
//! Admission decisions, upstream retries and classified failures are emitted as
//! [`GatewayEvent`]s. Events flow through [`TelemetrySink`] implementations, which are plain
//! `tower::Service<GatewayEvent>`s and can therefore be composed like any other service.
//!
//! - **Admission**: `Admitted`, `Denied`
//! - **Retry**: `Attempt`, `Exhausted`
//! - **Failure**: one event per classified failure
//!
//! Components hold an [`EventEmitter`], which erases the concrete sink type so the server can
//! pick a sink at startup without the limiter or retry policy becoming generic over it.
//!
//! ```rust
//! use birdhouse::telemetry::{EventEmitter, GatewayEvent, MemorySink, RetryEvent};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = MemorySink::new();
//! let emitter = EventEmitter::new(sink.clone());
//! emitter
//!     .emit(GatewayEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_secs(60) }))
//!     .await;
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

pub mod events;
pub mod sinks;

#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use events::{AdmissionEvent, FailureEvent, GatewayEvent, RetryEvent};
pub use sinks::{
    emit_best_effort, ComposedSinkError, LogSink, MemorySink, MulticastSink, NullSink,
    TelemetrySink,
};

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

trait ErasedSink: Send + Sync {
    fn emit(&self, event: GatewayEvent) -> BoxFuture<'static, ()>;
}

impl<S> ErasedSink for S
where
    S: TelemetrySink + Sync,
    <S as tower::Service<GatewayEvent>>::Future: Send + 'static,
{
    fn emit(&self, event: GatewayEvent) -> BoxFuture<'static, ()> {
        Box::pin(emit_best_effort(self.clone(), event))
    }
}

/// Cloneable handle to a type-erased telemetry sink.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn ErasedSink>,
}

impl EventEmitter {
    pub fn new<S>(sink: S) -> Self
    where
        S: TelemetrySink + Sync,
        <S as tower::Service<GatewayEvent>>::Future: Send + 'static,
    {
        Self { sink: Arc::new(sink) }
    }

    /// Emitter that discards everything.
    pub fn null() -> Self {
        Self::new(NullSink)
    }

    /// Deliver one event; sink errors are swallowed.
    pub async fn emit(&self, event: GatewayEvent) {
        self.sink.emit(event).await
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").field("sink", &"<sink>").finish()
    }
}
