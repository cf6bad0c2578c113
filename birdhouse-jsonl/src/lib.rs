//! JSONL sink for `birdhouse`. Writes one event per line.
//! Always writes; bring your own path.

use birdhouse::telemetry::{event_to_json, GatewayEvent, TelemetrySink};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: Arc<PathBuf>,
    // Serializes appends so lines from concurrent requests never interleave.
    write_lock: Arc<Mutex<()>>,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: Arc::new(path.into()), write_lock: Arc::new(Mutex::new(())) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Event JSON plus an RFC 3339 `ts` field.
fn render(event: &GatewayEvent) -> String {
    let mut value = event_to_json(event);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("ts".into(), chrono::Utc::now().to_rfc3339().into());
    }
    value.to_string() + "\n"
}

impl tower_service::Service<GatewayEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        let path = self.path.clone();
        let lock = self.write_lock.clone();
        let line = render(&event);
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let _guard = lock.lock().await;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(path.as_path()).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tracing::trace!(path = %path.display(), "telemetry line written");
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}
