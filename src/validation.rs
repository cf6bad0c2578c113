//! Checks applied to a post before it is sent upstream.

/// Longest accepted post, in characters (not bytes).
pub const MAX_POST_CHARS: usize = 280;
/// Most media attachments one post may carry.
pub const MAX_MEDIA_PER_POST: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Post text cannot be empty")]
    EmptyText,
    #[error("Post text too long: {chars}/{max} characters", max = MAX_POST_CHARS)]
    TextTooLong { chars: usize },
    #[error("Media attachments over limit: {count}/{max}", max = MAX_MEDIA_PER_POST)]
    TooManyMedia { count: usize },
}

/// Reject empty or whitespace-only text and text over [`MAX_POST_CHARS`].
pub fn validate_post_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let chars = text.chars().count();
    if chars > MAX_POST_CHARS {
        return Err(ValidationError::TextTooLong { chars });
    }
    Ok(())
}

pub fn validate_media_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_MEDIA_PER_POST {
        return Err(ValidationError::TooManyMedia { count });
    }
    Ok(())
}
