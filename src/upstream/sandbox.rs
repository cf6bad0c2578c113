//! In-memory [`SocialClient`] used when no real platform client is wired in.
//!
//! The sandbox keeps users, posts, likes, reposts, follows, direct messages and notifications
//! in process memory and persists its session through a [`SessionStore`], so login reuse
//! behaves exactly as it would against a real platform. Trends are derived from the hashtags
//! of stored posts.
//!
//! Tests can make the next N calls fail with a chosen [`UpstreamError`] via
//! [`SandboxClient::fail_next`], which is how retry and classification paths are exercised.

use super::{
    ActionReceipt, Author, Credentials, DirectMessage, Notification, NotificationKind, Post,
    PostDraft, SearchProduct, SearchQuery, SocialClient, Trend, UpstreamError, UserProfile, UserRef,
};
use crate::session::{Session, SessionStore};
use crate::validation::{validate_media_count, validate_post_text};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const MAX_TRENDS: usize = 20;

type FaultFactory = Arc<dyn Fn() -> UpstreamError + Send + Sync>;

struct Fault {
    remaining: usize,
    make: FaultFactory,
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault").field("remaining", &self.remaining).finish()
    }
}

#[derive(Debug, Default)]
struct State {
    me: Option<String>,
    users: BTreeMap<String, UserProfile>,
    // Keyed by numeric id, so iteration order is creation order.
    posts: BTreeMap<u64, Post>,
    likes: BTreeSet<(String, String)>,
    reposts: BTreeSet<(String, String)>,
    // (follower, followee)
    follows: BTreeSet<(String, String)>,
    dms: Vec<DirectMessage>,
    // (recipient, notification)
    notifications: Vec<(String, Notification)>,
    media: HashMap<String, PathBuf>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_user(&mut self, screen_name: &str, name: &str) -> String {
        let id = format!("u{}", self.next_id());
        self.users.insert(
            id.clone(),
            UserProfile {
                id: id.clone(),
                name: name.to_string(),
                screen_name: screen_name.to_string(),
                description: String::new(),
                location: String::new(),
                followers_count: 0,
                following_count: 0,
                post_count: 0,
                created_at: Utc::now(),
                verified: false,
                profile_image_url: None,
            },
        );
        id
    }

    fn find_screen_name(&self, screen_name: &str) -> Option<&UserProfile> {
        self.users.values().find(|u| u.screen_name.eq_ignore_ascii_case(screen_name))
    }

    fn me(&self) -> Result<String, UpstreamError> {
        self.me.clone().ok_or(UpstreamError::NotAuthenticated)
    }

    fn resolve(&self, user: &UserRef) -> Result<&UserProfile, UpstreamError> {
        let found = match user {
            UserRef::Id(id) => self.users.get(id),
            UserRef::ScreenName(name) => self.find_screen_name(name),
        };
        found.ok_or_else(|| UpstreamError::NotFound(user.to_string()))
    }

    fn user(&self, id: &str) -> Result<&UserProfile, UpstreamError> {
        self.users.get(id).ok_or_else(|| UpstreamError::NotFound(format!("user {id}")))
    }

    fn post_key(&self, post_id: &str) -> Result<u64, UpstreamError> {
        post_id
            .parse::<u64>()
            .ok()
            .filter(|k| self.posts.contains_key(k))
            .ok_or_else(|| UpstreamError::NotFound(format!("post {post_id}")))
    }

    fn notify(&mut self, recipient: &str, kind: NotificationKind, from: &str, post_id: Option<String>) {
        if recipient == from {
            return;
        }
        let id = format!("n{}", self.next_id());
        self.notifications.push((
            recipient.to_string(),
            Notification { id, kind, from_user: from.to_string(), post_id, created_at: Utc::now() },
        ));
    }

    fn profile(&self, user: &UserProfile) -> UserProfile {
        let mut profile = user.clone();
        profile.followers_count = self.follows.iter().filter(|(_, to)| *to == user.id).count() as u64;
        profile.following_count = self.follows.iter().filter(|(from, _)| *from == user.id).count() as u64;
        profile.post_count = self.posts.values().filter(|p| p.author.id == user.id).count() as u64;
        profile
    }

    fn publish(&mut self, author_id: &str, draft: &PostDraft) -> Result<Post, UpstreamError> {
        validate_post_text(&draft.text)?;
        validate_media_count(draft.media_ids.len())?;
        if let Some(unknown) = draft.media_ids.iter().find(|m| !self.media.contains_key(*m)) {
            return Err(UpstreamError::InvalidInput(format!("unknown media id {unknown}")));
        }
        let parent = draft.reply_to.as_deref().map(|id| self.post_key(id)).transpose()?;

        let user = self.user(author_id)?;
        let author = Author { id: user.id.clone(), name: user.name.clone(), screen_name: user.screen_name.clone() };
        let key = self.next_id();
        let post = Post {
            id: key.to_string(),
            text: draft.text.clone(),
            created_at: Utc::now(),
            author,
            media_ids: draft.media_ids.clone(),
            reply_to: draft.reply_to.clone(),
            like_count: 0,
            repost_count: 0,
            reply_count: 0,
            view_count: 0,
        };
        self.posts.insert(key, post.clone());

        if let Some(parent_key) = parent {
            let parent_author = self.posts.get_mut(&parent_key).map(|p| {
                p.reply_count += 1;
                p.author.id.clone()
            });
            if let Some(parent_author) = parent_author {
                self.notify(&parent_author, NotificationKind::Reply, author_id, Some(post.id.clone()));
            }
        }

        let mentioned: Vec<String> = tokens(&post.text, '@')
            .filter_map(|name| self.find_screen_name(&name).map(|u| u.id.clone()))
            .collect();
        for user_id in mentioned {
            self.notify(&user_id, NotificationKind::Mention, author_id, Some(post.id.clone()));
        }
        Ok(post)
    }

    fn newest_by<F>(&self, count: usize, keep: F) -> Vec<Post>
    where
        F: Fn(&Post) -> bool,
    {
        self.posts.values().rev().filter(|p| keep(*p)).take(count).cloned().collect()
    }
}

/// Words starting with `sigil`, stripped of the sigil and trailing punctuation.
fn tokens(text: &str, sigil: char) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().filter_map(move |word| {
        let tag = word.strip_prefix(sigil)?.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_');
        (!tag.is_empty()).then(|| tag.to_string())
    })
}

/// In-memory platform double.
#[derive(Debug)]
pub struct SandboxClient {
    store: SessionStore,
    authenticated: AtomicBool,
    state: Mutex<State>,
    fault: Mutex<Option<Fault>>,
    calls: AtomicU64,
}

impl SandboxClient {
    pub fn new(store: SessionStore) -> Self {
        tracing::info!(session_path = %store.path().display(), "sandbox client initialized");
        Self {
            store,
            authenticated: AtomicBool::new(false),
            state: Mutex::new(State::default()),
            fault: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Seed another account.
    pub fn with_user(self, screen_name: &str, name: &str) -> Self {
        self.state().add_user(screen_name, name);
        self
    }

    /// Make the next `count` calls fail with the error produced by `make`.
    pub fn fail_next<F>(&self, count: usize, make: F)
    where
        F: Fn() -> UpstreamError + Send + Sync + 'static,
    {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Fault { remaining: count, make: Arc::new(make) });
    }

    /// Calls received so far, including ones that failed.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn user_id(&self, screen_name: &str) -> Option<String> {
        self.state().find_screen_name(screen_name).map(|u| u.id.clone())
    }

    /// Publish a post as a seeded account.
    pub fn post_as(&self, screen_name: &str, text: &str) -> Result<Post, UpstreamError> {
        let mut state = self.state();
        let author = state.resolve(&UserRef::ScreenName(screen_name.to_string()))?.id.clone();
        state.publish(&author, &PostDraft { text: text.to_string(), ..PostDraft::default() })
    }

    /// Deliver a direct message from a seeded account to the logged-in user.
    pub fn deliver_dm(&self, from_screen_name: &str, text: &str) -> Result<DirectMessage, UpstreamError> {
        let mut state = self.state();
        let me = state.me()?;
        let from = state.resolve(&UserRef::ScreenName(from_screen_name.to_string()))?.id.clone();
        Ok(push_dm(&mut state, &from, &me, text))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and apply any injected fault.
    fn enter(&self, op: &'static str) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = fault.as_mut() {
            if f.remaining > 0 {
                f.remaining -= 1;
                let err = (f.make)();
                tracing::debug!(op, error = %err, "sandbox injected failure");
                return Err(err);
            }
            *fault = None;
        }
        Ok(())
    }

    fn session_state(&self, op: &'static str) -> Result<MutexGuard<'_, State>, UpstreamError> {
        self.enter(op)?;
        if !self.is_authenticated() {
            return Err(UpstreamError::NotAuthenticated);
        }
        Ok(self.state())
    }

    fn activate(&self, screen_name: &str) {
        let mut state = self.state();
        let id = match state.find_screen_name(screen_name) {
            Some(user) => user.id.clone(),
            None => state.add_user(screen_name, screen_name),
        };
        state.me = Some(id);
        self.authenticated.store(true, Ordering::SeqCst);
    }
}

fn push_dm(state: &mut State, from: &str, to: &str, text: &str) -> DirectMessage {
    let dm = DirectMessage {
        id: format!("dm{}", state.next_id()),
        sender_id: from.to_string(),
        recipient_id: to.to_string(),
        text: text.to_string(),
        created_at: Utc::now(),
    };
    state.dms.push(dm.clone());
    state.notify(to, NotificationKind::Message, from, None);
    dm
}

#[async_trait]
impl SocialClient for SandboxClient {
    async fn login(&self, credentials: &Credentials) -> Result<(), UpstreamError> {
        self.enter("login")?;
        if credentials.username.trim().is_empty() {
            return Err(UpstreamError::InvalidInput("username is required".into()));
        }

        if !credentials.force_new {
            match self.store.load().await? {
                Some(session) if session.username == credentials.username => {
                    tracing::info!(username = %session.username, "reusing stored session");
                    self.activate(&session.username);
                    return Ok(());
                }
                Some(_) => tracing::warn!("stored session belongs to another account; logging in again"),
                None => {}
            }
        }

        if credentials.password.is_empty() {
            return Err(UpstreamError::Unauthorized("invalid credentials".into()));
        }
        let session = Session {
            username: credentials.username.clone(),
            token: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };
        self.store.save(&session).await?;
        self.activate(&session.username);
        tracing::info!(username = %session.username, "logged in");
        Ok(())
    }

    async fn logout(&self) -> Result<(), UpstreamError> {
        self.enter("logout")?;
        self.authenticated.store(false, Ordering::SeqCst);
        self.state().me = None;
        self.store.clear().await?;
        tracing::info!("logged out");
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn has_session(&self) -> bool {
        self.store.exists()
    }

    async fn upload_media(&self, path: &Path) -> Result<String, UpstreamError> {
        drop(self.session_state("upload_media")?);
        let is_file = tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            return Err(UpstreamError::NotFound(format!("media file {}", path.display())));
        }
        let mut state = self.state();
        let id = format!("m{}", state.next_id());
        state.media.insert(id.clone(), path.to_path_buf());
        tracing::info!(media_id = %id, "media uploaded");
        Ok(id)
    }

    async fn create_post(&self, draft: &PostDraft) -> Result<Post, UpstreamError> {
        let mut state = self.session_state("create_post")?;
        let me = state.me()?;
        state.publish(&me, draft)
    }

    async fn search_posts(&self, query: &SearchQuery) -> Result<Vec<Post>, UpstreamError> {
        let state = self.session_state("search_posts")?;
        let needle = query.query.to_lowercase();
        let text_match = |p: &Post| p.text.to_lowercase().contains(&needle);
        let mut found = match query.product {
            SearchProduct::Latest | SearchProduct::Top => state.newest_by(usize::MAX, text_match),
            SearchProduct::Media => state.newest_by(usize::MAX, |p| !p.media_ids.is_empty() && text_match(p)),
            SearchProduct::People => state.newest_by(usize::MAX, |p| {
                p.author.screen_name.to_lowercase().contains(&needle)
                    || p.author.name.to_lowercase().contains(&needle)
            }),
        };
        if query.product == SearchProduct::Top {
            // Stable sort keeps newest-first among equals.
            found.sort_by_key(|p| std::cmp::Reverse(p.like_count + p.repost_count));
        }
        found.truncate(query.count);
        Ok(found)
    }

    async fn like_post(&self, post_id: &str) -> Result<ActionReceipt, UpstreamError> {
        let mut state = self.session_state("like_post")?;
        let me = state.me()?;
        let key = state.post_key(post_id)?;
        if state.likes.insert((me.clone(), post_id.to_string())) {
            let author = state.posts.get_mut(&key).map(|p| {
                p.like_count += 1;
                p.author.id.clone()
            });
            if let Some(author) = author {
                state.notify(&author, NotificationKind::Like, &me, Some(post_id.to_string()));
            }
        }
        Ok(ActionReceipt { success: true, post_id: post_id.to_string() })
    }

    async fn repost(&self, post_id: &str) -> Result<ActionReceipt, UpstreamError> {
        let mut state = self.session_state("repost")?;
        let me = state.me()?;
        let key = state.post_key(post_id)?;
        if state.reposts.insert((me.clone(), post_id.to_string())) {
            let author = state.posts.get_mut(&key).map(|p| {
                p.repost_count += 1;
                p.author.id.clone()
            });
            if let Some(author) = author {
                state.notify(&author, NotificationKind::Repost, &me, Some(post_id.to_string()));
            }
        }
        Ok(ActionReceipt { success: true, post_id: post_id.to_string() })
    }

    async fn delete_post(&self, post_id: &str) -> Result<(), UpstreamError> {
        let mut state = self.session_state("delete_post")?;
        let me = state.me()?;
        let key = state.post_key(post_id)?;
        if state.posts.get(&key).is_some_and(|p| p.author.id != me) {
            return Err(UpstreamError::Unauthorized(format!("post {post_id} belongs to another account")));
        }
        state.posts.remove(&key);
        state.likes.retain(|(_, p)| p != post_id);
        state.reposts.retain(|(_, p)| p != post_id);
        Ok(())
    }

    async fn user_profile(&self, user: &UserRef) -> Result<UserProfile, UpstreamError> {
        let state = self.session_state("user_profile")?;
        let found = state.resolve(user)?;
        Ok(state.profile(found))
    }

    async fn user_posts(&self, user: &UserRef, count: usize) -> Result<Vec<Post>, UpstreamError> {
        let state = self.session_state("user_posts")?;
        let id = state.resolve(user)?.id.clone();
        Ok(state.newest_by(count, |p| p.author.id == id))
    }

    async fn follow(&self, user_id: &str) -> Result<(), UpstreamError> {
        let mut state = self.session_state("follow")?;
        let me = state.me()?;
        state.user(user_id)?;
        if me == user_id {
            return Err(UpstreamError::InvalidInput("cannot follow yourself".into()));
        }
        if state.follows.insert((me.clone(), user_id.to_string())) {
            state.notify(user_id, NotificationKind::Follow, &me, None);
        }
        Ok(())
    }

    async fn unfollow(&self, user_id: &str) -> Result<(), UpstreamError> {
        let mut state = self.session_state("unfollow")?;
        let me = state.me()?;
        state.user(user_id)?;
        state.follows.remove(&(me, user_id.to_string()));
        Ok(())
    }

    async fn send_dm(&self, user_id: &str, text: &str) -> Result<DirectMessage, UpstreamError> {
        let mut state = self.session_state("send_dm")?;
        let me = state.me()?;
        state.user(user_id)?;
        if text.trim().is_empty() {
            return Err(UpstreamError::InvalidInput("message cannot be empty".into()));
        }
        Ok(push_dm(&mut state, &me, user_id, text))
    }

    async fn dm_inbox(&self, count: usize) -> Result<Vec<DirectMessage>, UpstreamError> {
        let state = self.session_state("dm_inbox")?;
        let me = state.me()?;
        Ok(state.dms.iter().rev().filter(|dm| dm.recipient_id == me).take(count).cloned().collect())
    }

    async fn trends(&self, location: &str) -> Result<Vec<Trend>, UpstreamError> {
        let state = self.session_state("trends")?;
        tracing::debug!(location, "sandbox trends ignore location");
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for post in state.posts.values() {
            for tag in tokens(&post.text, '#') {
                *counts.entry(tag.to_lowercase()).or_default() += 1;
            }
        }
        let mut trends: Vec<Trend> = counts
            .into_iter()
            .map(|(tag, post_count)| Trend {
                url: format!("/search?q=%23{tag}"),
                name: format!("#{tag}"),
                post_count,
            })
            .collect();
        // BTreeMap order makes ties alphabetical; the stable sort keeps it.
        trends.sort_by_key(|t| std::cmp::Reverse(t.post_count));
        trends.truncate(MAX_TRENDS);
        Ok(trends)
    }

    async fn home_timeline(&self, count: usize) -> Result<Vec<Post>, UpstreamError> {
        let state = self.session_state("home_timeline")?;
        let me = state.me()?;
        Ok(state.newest_by(count, |p| {
            p.author.id == me || state.follows.contains(&(me.clone(), p.author.id.clone()))
        }))
    }

    async fn notifications(&self, count: usize) -> Result<Vec<Notification>, UpstreamError> {
        let state = self.session_state("notifications")?;
        let me = state.me()?;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|(to, _)| *to == me)
            .map(|(_, n)| n.clone())
            .take(count)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(name: &str) -> Credentials {
        Credentials {
            username: name.into(),
            email: format!("{name}@example.com"),
            password: "pw".into(),
            force_new: false,
        }
    }

    #[test]
    fn tokens_strip_punctuation() {
        let tags: Vec<_> = tokens("hello #Rust, #tokio! #", '#').collect();
        assert_eq!(tags, vec!["Rust".to_string(), "tokio".to_string()]);
    }

    #[tokio::test]
    async fn operations_require_login() {
        let dir = tempfile::tempdir().unwrap();
        let client = SandboxClient::new(SessionStore::new(dir.path().join("s.json")));
        let err = client.home_timeline(5).await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotAuthenticated));
    }

    #[tokio::test]
    async fn injected_faults_expire() {
        let dir = tempfile::tempdir().unwrap();
        let client = SandboxClient::new(SessionStore::new(dir.path().join("s.json")));
        client.login(&creds("ada")).await.unwrap();
        client.fail_next(2, || UpstreamError::Network("connection reset".into()));
        assert!(client.trends("trending").await.is_err());
        assert!(client.trends("trending").await.is_err());
        assert!(client.trends("trending").await.is_ok());
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn reply_and_mention_notify_author() {
        let dir = tempfile::tempdir().unwrap();
        let client = SandboxClient::new(SessionStore::new(dir.path().join("s.json"))).with_user("bob", "Bob");
        client.login(&creds("ada")).await.unwrap();
        let mine = client.create_post(&PostDraft { text: "first".into(), ..Default::default() }).await.unwrap();

        let reply = PostDraft { text: "nice @ada".into(), reply_to: Some(mine.id.clone()), ..Default::default() };
        let bob = client.user_id("bob").unwrap();
        {
            let mut state = client.state();
            state.publish(&bob, &reply).unwrap();
        }

        let notes = client.notifications(10).await.unwrap();
        let kinds: Vec<_> = notes.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::Mention, NotificationKind::Reply]);
    }
}
