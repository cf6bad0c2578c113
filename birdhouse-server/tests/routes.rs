use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use birdhouse::telemetry::{EventEmitter, GatewayEvent, MemorySink};
use birdhouse::{
    InstantSleeper, ManualClock, RateLimiter, SandboxClient, SessionStore, SocialClient, UpstreamError,
    UpstreamPolicy,
};
use birdhouse_server::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Harness {
    app: Router,
    client: Arc<SandboxClient>,
    sink: MemorySink,
    _dir: tempfile::TempDir,
}

fn harness(rpm: u32, rph: u32) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(
        SandboxClient::new(SessionStore::new(dir.path().join("cookies.json"))).with_user("bob", "Bob"),
    );
    let sink = MemorySink::new();
    let events = EventEmitter::new(sink.clone());
    let limiter = Arc::new(RateLimiter::with_clock(rpm, rph, ManualClock::starting_at(1_000)).unwrap());
    let policy = UpstreamPolicy::builder().with_sleeper(InstantSleeper).with_events(events.clone()).build();
    let shared: Arc<dyn SocialClient> = client.clone();
    let app = router(AppState::new(shared, limiter, policy, events));
    Harness { app, client, sink, _dir: dir }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())) };
    (status, value)
}

async fn login(app: &Router) {
    let (status, body) = send(
        app,
        Method::POST,
        "/auth/login",
        Some(json!({"username": "ada", "email": "ada@example.com", "password": "pw"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn health_reports_version_and_auth() {
    let h = harness(30, 500);
    let (status, body) = send(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn requests_past_minute_budget_get_429() {
    let h = harness(3, 500);
    for _ in 0..3 {
        let (status, _) = send(&h.app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    // The oldest admission leaves the window one millisecond after the full minute.
    assert_eq!(response.headers()[header::RETRY_AFTER], "61");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "Rate limit exceeded. Try again later.");
    assert_eq!(body["window"], "minute");

    let denials = h
        .sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, GatewayEvent::Admission(birdhouse::telemetry::AdmissionEvent::Denied { .. })))
        .count();
    assert_eq!(denials, 1);
}

#[tokio::test]
async fn login_post_like_workflow() {
    let h = harness(30, 500);
    login(&h.app).await;

    let (status, body) = send(&h.app, Method::GET, "/auth/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"authenticated": true, "cookies_exist": true}));

    let (status, body) =
        send(&h.app, Method::POST, "/tweets/create", Some(json!({"text": "hello #rust"}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    let tweet_id = body["tweet_id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["text"], "hello #rust");
    assert_eq!(body["data"]["user"]["screen_name"], "ada");

    let bobs = h.client.post_as("bob", "#rust is fun").unwrap();
    let (status, body) =
        send(&h.app, Method::POST, &format!("/tweets/like?tweet_id={}", bobs.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"success": true, "tweet_id": bobs.id}));

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/tweets/search",
        Some(json!({"query": "rust", "product": "Top", "count": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["tweets"][0]["favorite_count"], 1);

    let (_, body) = send(&h.app, Method::GET, "/trends/worldwide", None).await;
    assert_eq!(body["location"], "worldwide");
    assert_eq!(body["trends"][0], json!({"name": "#rust", "url": "/search?q=%23rust", "tweet_count": 2}));

    let (status, body) = send(&h.app, Method::DELETE, &format!("/tweets/{tweet_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, body) = send(&h.app, Method::POST, "/auth/logout", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out");
    assert!(!h.client.has_session());
}

#[tokio::test]
async fn users_dm_and_timeline_routes() {
    let h = harness(30, 500);
    login(&h.app).await;
    let bob_id = h.client.user_id("bob").unwrap();
    h.client.post_as("bob", "first from bob").unwrap();

    let (status, body) =
        send(&h.app, Method::POST, "/users/profile", Some(json!({"username": "bob"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profile"]["id"], bob_id.as_str());
    assert_eq!(body["profile"]["tweet_count"], 1);

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/users/tweets?count=5",
        Some(json!({"user_id": bob_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (_, body) = send(&h.app, Method::POST, &format!("/users/follow?user_id={bob_id}"), None).await;
    assert_eq!(body["following"], true);
    let (_, body) = send(&h.app, Method::GET, "/timeline/home", None).await;
    assert_eq!(body["count"], 1);
    let (_, body) = send(&h.app, Method::POST, &format!("/users/unfollow?user_id={bob_id}"), None).await;
    assert_eq!(body["following"], false);

    let (status, body) = send(
        &h.app,
        Method::POST,
        "/dm/send",
        Some(json!({"user_id": bob_id, "message": "hi bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message_sent"], true);
    assert_eq!(body["data"]["message"], "hi bob");

    h.client.deliver_dm("bob", "hi ada").unwrap();
    let (_, body) = send(&h.app, Method::GET, "/dm/inbox?count=10", None).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["messages"][0]["message"], "hi ada");

    let (_, body) = send(&h.app, Method::GET, "/notifications", None).await;
    assert_eq!(body["notifications"][0]["type"], "message");
}

#[tokio::test]
async fn failures_map_to_category_status() {
    let h = harness(30, 500);

    // Not logged in.
    let (status, body) = send(&h.app, Method::GET, "/timeline/home", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], true);
    assert_eq!(body["category"], "AUTH");
    assert_eq!(body["type"], "NotAuthenticated");

    login(&h.app).await;

    let (status, body) =
        send(&h.app, Method::POST, "/tweets/create", Some(json!({"text": "x".repeat(281)}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["category"], "VALIDATION");
    assert_eq!(body["description"], "Validation error");

    let (status, body) = send(&h.app, Method::POST, "/users/profile", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("Provide either user_id or username"));

    let (status, body) = send(&h.app, Method::POST, "/tweets/like?tweet_id=424242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["category"], "NOT_FOUND");

    h.client.fail_next(1, || UpstreamError::Network("connection reset".into()));
    let (status, body) = send(&h.app, Method::GET, "/notifications", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["category"], "NETWORK");

    h.client.fail_next(10, || UpstreamError::RateLimited("Too Many Requests".into()));
    let (status, body) = send(&h.app, Method::GET, "/trends/trending", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["type"], "RetryExhausted");

    let (_, body) = send(&h.app, Method::GET, "/stats", None).await;
    assert_eq!(body["errors"]["AUTH"], 1);
    assert_eq!(body["errors"]["VALIDATION"], 2);
    assert_eq!(body["errors"]["NOT_FOUND"], 1);
    assert_eq!(body["errors"]["NETWORK"], 1);
    assert_eq!(body["errors"]["RATE_LIMIT"], 1);
    assert_eq!(body["errors"]["INTERNAL"], 0);
}

#[tokio::test]
async fn stats_and_reset() {
    let h = harness(30, 500);
    send(&h.app, Method::GET, "/health", None).await;
    send(&h.app, Method::GET, "/timeline/home", None).await;

    let (status, body) = send(&h.app, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["rate_limit"],
        json!({"requests_last_minute": 2, "requests_last_hour": 2, "minute_limit": 30, "hour_limit": 500})
    );
    assert_eq!(body["errors"]["AUTH"], 1);

    let (_, body) = send(&h.app, Method::POST, "/stats/reset", None).await;
    assert_eq!(body, json!({"status": "success"}));

    let (_, body) = send(&h.app, Method::GET, "/stats", None).await;
    assert_eq!(body["rate_limit"]["requests_last_minute"], 0);
    assert_eq!(body["errors"]["AUTH"], 0);
}

#[tokio::test]
async fn stats_routes_bypass_admission() {
    let h = harness(1, 500);
    let (status, _) = send(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    for _ in 0..3 {
        let (status, body) = send(&h.app, Method::GET, "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rate_limit"]["requests_last_minute"], 1);
    }

    let (status, body) = send(&h.app, Method::POST, "/stats/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success"}));

    let (status, _) = send(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_json_is_rejected_by_extractor() {
    let h = harness(30, 500);
    let (status, _) = send(&h.app, Method::POST, "/dm/send", Some(json!({"user_id": "u1"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
