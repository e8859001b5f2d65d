//! Client-side synchronization core for disposable chat rooms.
//!
//! The pieces line up with how a client session unfolds: [`RoomSession`]
//! creates or resolves a room, [`RoomWatcher`] keeps a live [`RoomView`] of
//! it, [`project_threads`] shapes the log for display and [`Composer`]
//! sends. All of it talks to the world through the traits in [`ports`], so
//! the same core runs against the REST/WebSocket backend or fully in
//! memory.

use chrono::{DateTime, Utc};
use shared::expiry::image_expired;
use shared::protocol::MessagePayload;

pub mod compose;
pub mod error;
pub mod memory;
pub mod ports;
pub mod projector;
pub mod reconciler;
pub mod rest;
pub mod session;

pub use compose::{Composer, Draft, ImageAttachment};
pub use error::{ComposeError, SessionError, SyncError};
pub use memory::{MemoryBackend, MemoryKv};
pub use ports::{
    AttachmentStore, Backend, ChangeFeed, DeviceKv, EventSubscription, MessageStore, RoomStore,
    StoreError,
};
pub use projector::{project_threads, ThreadView};
pub use reconciler::{RoomUpdate, RoomView, RoomWatcher};
pub use rest::BackendClient;
pub use session::{ResolvedRoom, RoomSession};

/// The image URL to render right now, or `None` once the attachment has
/// aged out. Checked against `now` on every call; visibility lapses with
/// time alone, no event required.
pub fn visible_image_url(message: &MessagePayload, now: DateTime<Utc>) -> Option<&str> {
    let url = message.image_url.as_deref()?;
    if image_expired(message.created_at, now) {
        return None;
    }
    Some(url)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
