//! Routes and handlers.

use crate::error::admission_error;
use crate::{ApiError, AppState};
use axum::error_handling::HandleErrorLayer;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use birdhouse::upstream::{Credentials, PostDraft, SearchQuery, UserRef};
use birdhouse::validation::{validate_media_count, validate_post_text};
use birdhouse::{RateLimitLayer, UpstreamError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tower::ServiceBuilder;

type ApiResult = Result<Json<Value>, ApiError>;

const DEFAULT_COUNT: usize = 20;

fn default_count() -> usize {
    DEFAULT_COUNT
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub text: String,
    #[serde(default)]
    pub media_paths: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

/// A user by id or screen name; the screen name wins when both are set.
#[derive(Debug, Deserialize)]
pub struct UserRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DmRequest {
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TweetIdQuery {
    pub tweet_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    #[serde(default = "default_count")]
    pub count: usize,
}

/// Build the gateway router. Platform routes are subject to admission control; `/stats` and
/// `/stats/reset` are merged outside it so they neither spend budget nor get refused.
pub fn router(state: AppState) -> Router {
    let admission = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(admission_error))
        .layer(RateLimitLayer::new(state.limiter.clone()).with_events(state.events.clone()));

    let admin = Router::new()
        .route("/stats", get(stats))
        .route("/stats/reset", post(reset_stats));

    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/status", get(auth_status))
        .route("/tweets/create", post(create_post))
        .route("/tweets/search", post(search_posts))
        .route("/tweets/like", post(like_post))
        .route("/tweets/retweet", post(repost))
        .route("/tweets/:tweet_id", delete(delete_post))
        .route("/users/profile", post(user_profile))
        .route("/users/tweets", post(user_posts))
        .route("/users/follow", post(follow))
        .route("/users/unfollow", post(unfollow))
        .route("/dm/send", post(send_dm))
        .route("/dm/inbox", get(dm_inbox))
        .route("/trends/:location", get(trends))
        .route("/timeline/home", get(home_timeline))
        .route("/notifications", get(notifications))
        .layer(admission)
        .merge(admin)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "authenticated": state.client.is_authenticated(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn login(State(state): State<AppState>, Json(credentials): Json<Credentials>) -> ApiResult {
    state.upstream(|| state.client.login(&credentials)).await?;
    tracing::info!(username = %credentials.username, "login succeeded");
    Ok(Json(json!({
        "status": "success",
        "message": "Authenticated successfully",
        "cookies_saved": true,
    })))
}

async fn logout(State(state): State<AppState>) -> ApiResult {
    state.upstream(|| state.client.logout()).await?;
    Ok(Json(json!({"status": "success", "message": "Logged out"})))
}

async fn auth_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "authenticated": state.client.is_authenticated(),
        "cookies_exist": state.client.has_session(),
    }))
}

async fn create_post(State(state): State<AppState>, Json(request): Json<CreatePostRequest>) -> ApiResult {
    let media_paths = request.media_paths.unwrap_or_default();
    // Reject before any media is uploaded.
    let checked = validate_post_text(&request.text).and_then(|()| validate_media_count(media_paths.len()));
    if let Err(invalid) = checked {
        return Err(state.reject(&UpstreamError::from(invalid)).await);
    }

    let mut media_ids = Vec::with_capacity(media_paths.len());
    for path in &media_paths {
        media_ids.push(state.upstream(|| state.client.upload_media(path)).await?);
    }

    let draft = PostDraft { text: request.text, media_ids, reply_to: request.reply_to };
    let created = state.upstream(|| state.client.create_post(&draft)).await?;
    tracing::info!(post_id = %created.id, "post created");
    Ok(Json(json!({"status": "success", "tweet_id": created.id, "data": created})))
}

async fn search_posts(State(state): State<AppState>, Json(query): Json<SearchQuery>) -> ApiResult {
    let found = state.upstream(|| state.client.search_posts(&query)).await?;
    tracing::info!(query = %query.query, hits = found.len(), "search completed");
    Ok(Json(json!({"status": "success", "count": found.len(), "tweets": found})))
}

async fn like_post(State(state): State<AppState>, Query(q): Query<TweetIdQuery>) -> ApiResult {
    let receipt = state.upstream(|| state.client.like_post(&q.tweet_id)).await?;
    Ok(Json(json!({"status": "success", "data": receipt})))
}

async fn repost(State(state): State<AppState>, Query(q): Query<TweetIdQuery>) -> ApiResult {
    let receipt = state.upstream(|| state.client.repost(&q.tweet_id)).await?;
    Ok(Json(json!({"status": "success", "data": receipt})))
}

async fn delete_post(State(state): State<AppState>, Path(tweet_id): Path<String>) -> ApiResult {
    state.upstream(|| state.client.delete_post(&tweet_id)).await?;
    Ok(Json(json!({"status": "success", "deleted": true})))
}

async fn resolve_user(state: &AppState, request: UserRequest) -> Result<UserRef, ApiError> {
    match UserRef::from_parts(request.user_id, request.username) {
        Ok(user) => Ok(user),
        Err(err) => Err(state.reject(&err).await),
    }
}

async fn user_profile(State(state): State<AppState>, Json(request): Json<UserRequest>) -> ApiResult {
    let user = resolve_user(&state, request).await?;
    let profile = state.upstream(|| state.client.user_profile(&user)).await?;
    Ok(Json(json!({"status": "success", "profile": profile})))
}

async fn user_posts(
    State(state): State<AppState>,
    Query(q): Query<CountQuery>,
    Json(request): Json<UserRequest>,
) -> ApiResult {
    let user = resolve_user(&state, request).await?;
    let posts = state.upstream(|| state.client.user_posts(&user, q.count)).await?;
    Ok(Json(json!({"status": "success", "count": posts.len(), "tweets": posts})))
}

async fn follow(State(state): State<AppState>, Query(q): Query<UserIdQuery>) -> ApiResult {
    state.upstream(|| state.client.follow(&q.user_id)).await?;
    Ok(Json(json!({"status": "success", "following": true})))
}

async fn unfollow(State(state): State<AppState>, Query(q): Query<UserIdQuery>) -> ApiResult {
    state.upstream(|| state.client.unfollow(&q.user_id)).await?;
    Ok(Json(json!({"status": "success", "following": false})))
}

async fn send_dm(State(state): State<AppState>, Json(request): Json<DmRequest>) -> ApiResult {
    let sent = state.upstream(|| state.client.send_dm(&request.user_id, &request.message)).await?;
    Ok(Json(json!({"status": "success", "message_sent": true, "data": sent})))
}

async fn dm_inbox(State(state): State<AppState>, Query(q): Query<CountQuery>) -> ApiResult {
    let messages = state.upstream(|| state.client.dm_inbox(q.count)).await?;
    Ok(Json(json!({"status": "success", "count": messages.len(), "messages": messages})))
}

async fn trends(State(state): State<AppState>, Path(location): Path<String>) -> ApiResult {
    let trends = state.upstream(|| state.client.trends(&location)).await?;
    Ok(Json(json!({"status": "success", "location": location, "trends": trends})))
}

async fn home_timeline(State(state): State<AppState>, Query(q): Query<CountQuery>) -> ApiResult {
    let posts = state.upstream(|| state.client.home_timeline(q.count)).await?;
    Ok(Json(json!({"status": "success", "count": posts.len(), "tweets": posts})))
}

async fn notifications(State(state): State<AppState>, Query(q): Query<CountQuery>) -> ApiResult {
    let notifications = state.upstream(|| state.client.notifications(q.count)).await?;
    Ok(Json(json!({"status": "success", "count": notifications.len(), "notifications": notifications})))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "rate_limit": state.limiter.stats(),
        "errors": state.errors.error_stats(),
    }))
}

async fn reset_stats(State(state): State<AppState>) -> Json<Value> {
    state.limiter.reset();
    state.errors.reset_stats();
    tracing::info!("limiter and error counters reset");
    Json(json!({"status": "success"}))
}
