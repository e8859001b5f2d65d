//! Port contracts between the synchronization core and its collaborators.
//!
//! Everything the core needs from the outside world comes through these
//! traits: the room and message stores, the per-room change feed, the
//! attachment store and the device-local key-value scope. Production wires
//! them to [`crate::rest::BackendClient`]; tests and embedded use wire them
//! to [`crate::memory::MemoryBackend`].

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use shared::domain::{RoomId, Slug};
use shared::protocol::{MessagePayload, RoomEvent, RoomSnapshot, SendMessageRequest};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Failures reported by the stores behind the ports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("credential rejected")]
    Unauthorized,
    #[error("slug is already taken")]
    DuplicateSlug,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Room lifecycle operations. Every write re-checks the owner credential on
/// the store side; locally held ownership knowledge never substitutes for it.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Creates a room under `slug`. `DuplicateSlug` when the slug is taken;
    /// whether to pick a fresh slug is the caller's decision, not this
    /// port's.
    async fn create_room(
        &self,
        slug: &Slug,
        owner_credential: &str,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RoomSnapshot, StoreError>;

    async fn room_by_slug(&self, slug: &Slug) -> Result<RoomSnapshot, StoreError>;

    async fn rename_room(
        &self,
        room_id: RoomId,
        credential: &str,
        name: &str,
    ) -> Result<(), StoreError>;

    async fn delete_room(&self, room_id: RoomId, credential: &str) -> Result<(), StoreError>;
}

/// Append-only message log per room, listed in ascending creation order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(
        &self,
        room_id: RoomId,
        message: SendMessageRequest,
    ) -> Result<MessagePayload, StoreError>;

    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<MessagePayload>, StoreError>;
}

/// Per-room event delivery. Implementations deliver at least once, in store
/// commit order within a room; duplicates are the consumer's problem.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, room_id: RoomId) -> Result<EventSubscription, StoreError>;
}

/// Object storage for uploaded images. `upload` returns the public URL the
/// message will carry. There is no delete or read-expiry call here; image
/// expiry is a render-time rule, not a storage one.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;
}

/// Device-local durable storage. Survives restarts, is never shared across
/// devices, and is injected rather than reached for globally. Holds owner
/// credentials keyed by slug and last-used nicknames keyed by room id.
#[async_trait]
pub trait DeviceKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Everything a connected client needs from the backend, as one object.
pub trait Backend: RoomStore + MessageStore + ChangeFeed + AttachmentStore {}

impl<T> Backend for T where T: RoomStore + MessageStore + ChangeFeed + AttachmentStore {}

pub fn owner_credential_key(slug: &Slug) -> String {
    format!("owner:{slug}")
}

pub fn nickname_key(room_id: RoomId) -> String {
    format!("nickname:{}", room_id.0)
}

/// A live event stream for one room. Dropping it releases the subscription
/// along with whatever task pumps it.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: mpsc::Receiver<RoomEvent>,
    pump: Option<JoinHandle<()>>,
}

impl EventSubscription {
    pub fn new(receiver: mpsc::Receiver<RoomEvent>, pump: JoinHandle<()>) -> Self {
        Self {
            receiver,
            pump: Some(pump),
        }
    }

    /// A subscription with no backing task, fed directly through the sender
    /// half of `receiver`.
    pub fn from_receiver(receiver: mpsc::Receiver<RoomEvent>) -> Self {
        Self {
            receiver,
            pump: None,
        }
    }

    /// Next delivered event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<RoomEvent> {
        self.receiver.recv().await
    }
}

impl Stream for EventSubscription {
    type Item = RoomEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RoomEvent>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
