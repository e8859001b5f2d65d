//! Error types surfaced by the synchronization core.
//!
//! Callers branch on these rather than on strings: `NotFound` redirects to
//! room creation, `Unauthorized` is a refusal with no retry, invalid input
//! is reported before any network call, and an upload failure keeps the
//! draft alive for another attempt.

use thiserror::Error;

use crate::ports::StoreError;

/// Room lifecycle failures: resolve, create, rename, delete.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The slug names no room. Terminal for this navigation.
    #[error("room not found")]
    NotFound,
    /// Credential missing on this device or rejected by the store.
    #[error("owner credential rejected")]
    Unauthorized,
    /// The generated slug is already taken. Surfaced to the caller instead
    /// of retried; collisions are rare enough to make the failure visible.
    #[error("slug is already taken")]
    DuplicateSlug,
    /// Rejected before any network call.
    #[error("{0}")]
    Invalid(String),
    #[error("backend failure: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Unauthorized => Self::Unauthorized,
            StoreError::DuplicateSlug => Self::DuplicateSlug,
            StoreError::Invalid(message) => Self::Invalid(message),
            StoreError::Backend(err) => Self::Backend(err),
        }
    }
}

/// Failures while composing or sending a message.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Neither text nor image. Rejected before any network call.
    #[error("a message needs text or an image")]
    Empty,
    /// Replies carry text; an image alone does not make a reply.
    #[error("a reply needs a text body")]
    ReplyNeedsText,
    /// The reply target is not a root message of this room.
    #[error("replies can only target root messages")]
    NotARoot,
    /// The attachment store refused the upload. The message was not sent;
    /// the caller still holds the draft and can retry.
    #[error("image upload failed: {0}")]
    Upload(#[source] anyhow::Error),
    /// The append itself failed after any upload succeeded.
    #[error(transparent)]
    Store(StoreError),
}

/// Fatal failures while bringing a room view up. Interruptions after a
/// successful start are recovered internally and reported as updates, not
/// as errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("initial message fetch failed: {0}")]
    InitialFetch(#[source] StoreError),
    #[error("could not subscribe to room events: {0}")]
    InitialSubscribe(#[source] StoreError),
}
