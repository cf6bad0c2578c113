//! Persistence for the single upstream credential blob.
//!
//! The session is stored as one JSON document. A missing file is not an error: it simply
//! means there is no session to reuse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Where the session lives unless configured otherwise.
pub const DEFAULT_SESSION_PATH: &str = "data/cookies.json";

/// Authenticated upstream session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to access session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt session file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON file holding at most one [`Session`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_PATH)
    }
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn io_error(&self, source: io::Error) -> SessionError {
        SessionError::Io { path: self.path.clone(), source }
    }

    /// Read the stored session, if any.
    pub async fn load(&self) -> Result<Option<Session>, SessionError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SessionError::Corrupt { path: self.path.clone(), source })
    }

    /// Write the session, creating parent directories as needed.
    pub async fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_vec_pretty(session)
            .map_err(|source| SessionError::Corrupt { path: self.path.clone(), source })?;
        tokio::fs::write(&self.path, json).await.map_err(|e| self.io_error(e))?;
        tracing::info!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Delete the stored session. Clearing an absent session succeeds.
    pub async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session { username: "ada".into(), token: "t-1".into(), created_at: Utc::now() }
    }

    #[tokio::test]
    async fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/data/cookies.json"));
        assert!(!store.exists());
        assert_eq!(store.load().await.unwrap(), None);

        let saved = session();
        store.save(&saved).await.unwrap();
        assert!(store.exists());
        assert_eq!(store.load().await.unwrap(), Some(saved));

        store.clear().await.unwrap();
        assert!(!store.exists());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = SessionStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, SessionError::Corrupt { .. }));
    }

    #[test]
    fn debug_redacts_token() {
        let text = format!("{:?}", session());
        assert!(!text.contains("t-1"));
        assert!(text.contains("ada"));
    }
}
