//! In-memory implementation of every port: a complete single-process store
//! with a broadcast-based change feed. Tests run against it, and it serves
//! as an embedded backend where no server is wanted.
//!
//! It enforces the same write rules as the real backend (credential checks,
//! text-or-image, replies only under roots) so the two are interchangeable
//! behind the ports.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::{nickname_or_default, MessageId, RoomId, Slug};
use shared::protocol::{MessagePayload, RoomEvent, RoomSnapshot, SendMessageRequest};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::ports::{
    AttachmentStore, ChangeFeed, DeviceKv, EventSubscription, MessageStore, RoomStore, StoreError,
};

const FEED_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 64;

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<(RoomId, RoomEvent)>,
    closed: broadcast::Sender<RoomId>,
}

#[derive(Default)]
struct MemoryState {
    next_room_id: i64,
    next_message_id: i64,
    rooms: HashMap<RoomId, MemoryRoom>,
    messages: HashMap<RoomId, Vec<MessagePayload>>,
    objects: HashMap<String, StoredObject>,
}

struct MemoryRoom {
    snapshot: RoomSnapshot,
    owner_credential: String,
}

struct StoredObject {
    content_type: String,
    bytes: Vec<u8>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        let (closed, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
            closed,
        }
    }

    /// The stored object behind an uploaded path, if any.
    pub async fn object(&self, path: &str) -> Option<(String, Vec<u8>)> {
        let state = self.state.lock().await;
        state
            .objects
            .get(path)
            .map(|object| (object.content_type.clone(), object.bytes.clone()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryBackend {
    async fn create_room(
        &self,
        slug: &Slug,
        owner_credential: &str,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RoomSnapshot, StoreError> {
        let mut state = self.state.lock().await;
        if state.rooms.values().any(|room| room.snapshot.slug == *slug) {
            return Err(StoreError::DuplicateSlug);
        }
        state.next_room_id += 1;
        let snapshot = RoomSnapshot {
            room_id: RoomId(state.next_room_id),
            slug: slug.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
            expires_at,
        };
        state.rooms.insert(
            snapshot.room_id,
            MemoryRoom {
                snapshot: snapshot.clone(),
                owner_credential: owner_credential.to_string(),
            },
        );
        state.messages.insert(snapshot.room_id, Vec::new());
        Ok(snapshot)
    }

    async fn room_by_slug(&self, slug: &Slug) -> Result<RoomSnapshot, StoreError> {
        let state = self.state.lock().await;
        state
            .rooms
            .values()
            .find(|room| room.snapshot.slug == *slug)
            .map(|room| room.snapshot.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn rename_room(
        &self,
        room_id: RoomId,
        credential: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let room = state.rooms.get_mut(&room_id).ok_or(StoreError::NotFound)?;
        if room.owner_credential != credential {
            return Err(StoreError::Unauthorized);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("room name cannot be empty".to_string()));
        }
        room.snapshot.name = name.to_string();
        let _ = self.events.send((
            room_id,
            RoomEvent::RoomRenamed {
                name: name.to_string(),
            },
        ));
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId, credential: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let room = state.rooms.get(&room_id).ok_or(StoreError::NotFound)?;
        if room.owner_credential != credential {
            return Err(StoreError::Unauthorized);
        }
        state.rooms.remove(&room_id);
        state.messages.remove(&room_id);
        // Ends every live subscription for the room, same as the server
        // closing its sockets.
        let _ = self.closed.send(room_id);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn append_message(
        &self,
        room_id: RoomId,
        message: SendMessageRequest,
    ) -> Result<MessagePayload, StoreError> {
        let mut state = self.state.lock().await;
        if !state.rooms.contains_key(&room_id) {
            return Err(StoreError::NotFound);
        }
        let content = message
            .content
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let image_url = message
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        if content.is_none() && image_url.is_none() {
            return Err(StoreError::Invalid(
                "a message needs text or an image".to_string(),
            ));
        }
        if let Some(parent_id) = message.parent_id {
            let parent = state
                .messages
                .get(&room_id)
                .and_then(|log| log.iter().find(|m| m.message_id == parent_id));
            match parent {
                None => {
                    return Err(StoreError::Invalid(
                        "parent message does not exist".to_string(),
                    ))
                }
                Some(parent) if !parent.is_root() => {
                    return Err(StoreError::Invalid(
                        "replies can only target root messages".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }

        state.next_message_id += 1;
        let payload = MessagePayload {
            message_id: MessageId(state.next_message_id),
            room_id,
            nickname: nickname_or_default(&message.nickname),
            content,
            image_url,
            parent_id: message.parent_id,
            created_at: Utc::now(),
        };
        state.messages.entry(room_id).or_default().push(payload.clone());
        let _ = self.events.send((
            room_id,
            RoomEvent::MessageAppended {
                message: payload.clone(),
            },
        ));
        Ok(payload)
    }

    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<MessagePayload>, StoreError> {
        let state = self.state.lock().await;
        if !state.rooms.contains_key(&room_id) {
            return Err(StoreError::NotFound);
        }
        Ok(state.messages.get(&room_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, room_id: RoomId) -> Result<EventSubscription, StoreError> {
        {
            let state = self.state.lock().await;
            if !state.rooms.contains_key(&room_id) {
                return Err(StoreError::NotFound);
            }
        }
        let mut events = self.events.subscribe();
        let mut closed = self.closed.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok((id, event)) if id == room_id => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        // Lagged or sender gone: end the stream so the
                        // consumer refetches.
                        Err(_) => break,
                    },
                    gone = closed.recv() => match gone {
                        Ok(id) if id == room_id => break,
                        Ok(_) => {}
                        Err(_) => break,
                    },
                }
            }
        });
        Ok(EventSubscription::new(rx, pump))
    }
}

#[async_trait]
impl AttachmentStore for MemoryBackend {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let mut state = self.state.lock().await;
        state.objects.insert(
            path.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(format!("memory://{path}"))
    }
}

/// In-memory stand-in for the device KV. Durability aside, it behaves like
/// the real thing.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceKv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
