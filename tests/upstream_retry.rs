use birdhouse::classify::{ErrorCategory, ErrorHandler};
use birdhouse::telemetry::{EventEmitter, GatewayEvent, MemorySink, RetryEvent};
use birdhouse::upstream::{Credentials, SandboxClient, SocialClient};
use birdhouse::{Backoff, GatewayError, SessionStore, TrackingSleeper, UpstreamError, UpstreamPolicy};
use std::time::Duration;

async fn logged_in(dir: &tempfile::TempDir) -> SandboxClient {
    let client = SandboxClient::new(SessionStore::new(dir.path().join("cookies.json")));
    client
        .login(&Credentials {
            username: "ada".into(),
            email: "ada@example.com".into(),
            password: "secret".into(),
            force_new: false,
        })
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn rate_limited_calls_back_off_one_two_four_minutes() {
    let dir = tempfile::tempdir().unwrap();
    let client = logged_in(&dir).await;
    client.fail_next(10, || UpstreamError::RateLimited("Too Many Requests".into()));

    let sleeper = TrackingSleeper::new();
    let sink = MemorySink::new();
    let policy = UpstreamPolicy::builder()
        .with_sleeper(sleeper.clone())
        .with_events(EventEmitter::new(sink.clone()))
        .build();

    let result = policy.execute(|| client.trends("trending")).await;

    let err = result.unwrap_err();
    assert!(matches!(err, GatewayError::RetryExhausted { attempts: 4, .. }));
    assert_eq!(
        sleeper.calls(),
        vec![Duration::from_secs(60), Duration::from_secs(120), Duration::from_secs(240)]
    );
    assert_eq!(client.calls(), 1 + 4, "login plus four attempts");

    let events = sink.events();
    assert_eq!(events.len(), 4);
    assert_eq!(
        events[3],
        GatewayEvent::Retry(RetryEvent::Exhausted {
            total_attempts: 4,
            total_duration: Duration::from_secs(420),
        })
    );

    let record = ErrorHandler::new().format_error(&err);
    assert_eq!(record.category, ErrorCategory::RateLimit);
    assert_eq!(record.error_type, "RetryExhausted");
}

#[tokio::test]
async fn retry_succeeds_once_upstream_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let client = logged_in(&dir).await;
    client.fail_next(1, || UpstreamError::RateLimited("slow down".into()));

    let sleeper = TrackingSleeper::new();
    let policy = UpstreamPolicy::builder().with_sleeper(sleeper.clone()).build();

    let trends = policy.execute(|| client.trends("trending")).await.unwrap();
    assert!(trends.is_empty());
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(60)]);
}

#[tokio::test]
async fn non_rate_limit_failures_surface_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let client = logged_in(&dir).await;
    client.fail_next(1, || UpstreamError::Network("connection reset".into()));

    let sleeper = TrackingSleeper::new();
    let policy = UpstreamPolicy::builder().with_sleeper(sleeper.clone()).build();

    let err = policy.execute(|| client.home_timeline(20)).await.unwrap_err();
    let record = ErrorHandler::new().format_error(&err);
    assert_eq!(record.category, ErrorCategory::Network);
    assert!(sleeper.calls().is_empty());
}

#[tokio::test]
async fn not_found_mentioning_rate_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let client = logged_in(&dir).await;

    let sleeper = TrackingSleeper::new();
    let policy = UpstreamPolicy::builder().with_sleeper(sleeper.clone()).build();

    let err = policy.execute(|| client.follow("corporate")).await.unwrap_err();
    assert!(matches!(&err, GatewayError::Inner(UpstreamError::NotFound(m)) if m == "user corporate"));
    assert!(sleeper.calls().is_empty());
    assert_eq!(client.calls(), 1 + 1, "login plus a single attempt");

    // The text still trips the keyword classifier; only the retry decision ignores it.
    let record = ErrorHandler::new().format_error(&err);
    assert_eq!(record.category, ErrorCategory::RateLimit);
    assert_eq!(record.error_type, "NotFound");
}

#[tokio::test]
async fn capped_backoff_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let client = logged_in(&dir).await;
    client.fail_next(3, || UpstreamError::RateLimited("429".into()));

    let sleeper = TrackingSleeper::new();
    let backoff = Backoff::exponential(Duration::from_secs(60)).with_max(Duration::from_secs(90)).unwrap();
    let policy = UpstreamPolicy::builder().backoff(backoff).with_sleeper(sleeper.clone()).build();

    policy.execute(|| client.notifications(5)).await.unwrap();
    assert_eq!(
        sleeper.calls(),
        vec![Duration::from_secs(60), Duration::from_secs(90), Duration::from_secs(90)]
    );
}
