//! Capability interface to the wrapped social platform.
//!
//! The gateway never speaks the platform protocol itself. Everything it needs is expressed by
//! [`SocialClient`]; a production deployment plugs in a real client, while [`sandbox`] provides
//! an in-memory implementation for local runs and tests.
//!
//! Failures are reported as [`UpstreamError`]. Each variant's message carries the keyword the
//! classifier looks for, so `NotFound` classifies as `NOT_FOUND`, `RateLimited` as
//! `RATE_LIMIT`, and so on.

use crate::classify::Failure;
use crate::session::SessionError;
use crate::validation::ValidationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;

pub mod sandbox;

pub use sandbox::SandboxClient;

/// Failure reported by a [`SocialClient`].
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("not authenticated: log in first")]
    NotAuthenticated,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream service error: {0}")]
    Service(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store error: {0}")]
    Session(#[from] SessionError),
}

impl From<ValidationError> for UpstreamError {
    fn from(err: ValidationError) -> Self {
        UpstreamError::InvalidInput(err.to_string())
    }
}

impl Failure for UpstreamError {
    fn kind(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            UpstreamError::NotAuthenticated => "NotAuthenticated",
            UpstreamError::Unauthorized(_) => "Unauthorized",
            UpstreamError::RateLimited(_) => "RateLimited",
            UpstreamError::NotFound(_) => "NotFound",
            UpstreamError::InvalidInput(_) => "InvalidInput",
            UpstreamError::Network(_) => "Network",
            UpstreamError::Service(_) => "Service",
            UpstreamError::Io(_) => "Io",
            UpstreamError::Session(_) => "Session",
        })
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn signals_rate_limit(&self) -> bool {
        matches!(self, UpstreamError::RateLimited(_))
    }
}

/// Login request. `force_new` skips reuse of a stored session.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub force_new: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("force_new", &self.force_new)
            .finish()
    }
}

/// A post ready to publish. Media must already be uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDraft {
    pub text: String,
    #[serde(default)]
    pub media_ids: Vec<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

/// Result ordering/filtering for [`SearchQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchProduct {
    #[default]
    Latest,
    Top,
    Media,
    People,
}

fn default_count() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub product: SearchProduct,
    #[serde(default = "default_count")]
    pub count: usize,
}

/// A user addressed by id or by screen name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
    Id(String),
    ScreenName(String),
}

impl UserRef {
    /// Screen name wins when both are given; neither is a validation failure.
    pub fn from_parts(user_id: Option<String>, username: Option<String>) -> Result<Self, UpstreamError> {
        match (user_id, username) {
            (_, Some(name)) if !name.is_empty() => Ok(UserRef::ScreenName(name)),
            (Some(id), _) if !id.is_empty() => Ok(UserRef::Id(id)),
            _ => Err(UpstreamError::InvalidInput("Provide either user_id or username".into())),
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRef::Id(id) => write!(f, "user {}", id),
            UserRef::ScreenName(name) => write!(f, "@{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub screen_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "user")]
    pub author: Author,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(rename = "favorite_count")]
    pub like_count: u64,
    #[serde(rename = "retweet_count")]
    pub repost_count: u64,
    pub reply_count: u64,
    pub view_count: u64,
}

/// Acknowledgement of a like or repost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub success: bool,
    #[serde(rename = "tweet_id")]
    pub post_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub screen_name: String,
    pub description: String,
    pub location: String,
    pub followers_count: u64,
    pub following_count: u64,
    #[serde(rename = "tweet_count")]
    pub post_count: u64,
    pub created_at: DateTime<Utc>,
    pub verified: bool,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(rename = "message")]
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trend {
    pub name: String,
    pub url: String,
    #[serde(rename = "tweet_count")]
    pub post_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Reply,
    Like,
    Repost,
    Follow,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Operations the gateway exposes, delegated to the wrapped platform.
#[async_trait]
pub trait SocialClient: Send + Sync + fmt::Debug {
    /// Authenticate, reusing a stored session unless `credentials.force_new` is set.
    async fn login(&self, credentials: &Credentials) -> Result<(), UpstreamError>;
    /// Drop authentication and delete the stored session.
    async fn logout(&self) -> Result<(), UpstreamError>;
    fn is_authenticated(&self) -> bool;
    /// Whether a stored session exists on disk.
    fn has_session(&self) -> bool;

    /// Upload a local file and return its media id.
    async fn upload_media(&self, path: &Path) -> Result<String, UpstreamError>;
    async fn create_post(&self, draft: &PostDraft) -> Result<Post, UpstreamError>;
    async fn search_posts(&self, query: &SearchQuery) -> Result<Vec<Post>, UpstreamError>;
    async fn like_post(&self, post_id: &str) -> Result<ActionReceipt, UpstreamError>;
    async fn repost(&self, post_id: &str) -> Result<ActionReceipt, UpstreamError>;
    async fn delete_post(&self, post_id: &str) -> Result<(), UpstreamError>;

    async fn user_profile(&self, user: &UserRef) -> Result<UserProfile, UpstreamError>;
    async fn user_posts(&self, user: &UserRef, count: usize) -> Result<Vec<Post>, UpstreamError>;
    async fn follow(&self, user_id: &str) -> Result<(), UpstreamError>;
    async fn unfollow(&self, user_id: &str) -> Result<(), UpstreamError>;

    async fn send_dm(&self, user_id: &str, text: &str) -> Result<DirectMessage, UpstreamError>;
    /// Messages received by the authenticated user, newest first.
    async fn dm_inbox(&self, count: usize) -> Result<Vec<DirectMessage>, UpstreamError>;

    async fn trends(&self, location: &str) -> Result<Vec<Trend>, UpstreamError>;
    async fn home_timeline(&self, count: usize) -> Result<Vec<Post>, UpstreamError>;
    async fn notifications(&self, count: usize) -> Result<Vec<Notification>, UpstreamError>;
}
