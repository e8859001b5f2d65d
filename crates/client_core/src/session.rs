//! Room lifecycle from one device's point of view: create, resolve by slug,
//! rename, delete.
//!
//! Ownership lives in two places with different weight. The device KV holds
//! the credential as an advisory fact (it decides whether to even offer the
//! owner controls); the store re-checks the credential on every write and is
//! the only authority.

use std::sync::Arc;

use chrono::Utc;
use shared::domain::{new_owner_credential, room_name_or_default, Slug};
use shared::expiry::room_expiry_after;
use shared::protocol::RoomSnapshot;
use tracing::info;

use crate::error::SessionError;
use crate::ports::{owner_credential_key, DeviceKv, RoomStore};

/// A room as seen from this device. `owned` reflects only what the local KV
/// knows; a write can still come back `Unauthorized`.
#[derive(Debug, Clone)]
pub struct ResolvedRoom {
    pub room: RoomSnapshot,
    pub owned: bool,
}

pub struct RoomSession {
    rooms: Arc<dyn RoomStore>,
    kv: Arc<dyn DeviceKv>,
}

impl RoomSession {
    pub fn new(rooms: Arc<dyn RoomStore>, kv: Arc<dyn DeviceKv>) -> Self {
        Self { rooms, kv }
    }

    /// Creates a room under a freshly generated slug and stores the owner
    /// credential durably before handing the room back, so a reload after
    /// navigation still finds it. A blank name becomes the stock room name.
    ///
    /// Slug collisions surface as [`SessionError::DuplicateSlug`]; no second
    /// slug is tried here.
    pub async fn create(&self, name: &str) -> Result<ResolvedRoom, SessionError> {
        let slug = Slug::random();
        let credential = new_owner_credential();
        let expires_at = room_expiry_after(Utc::now());
        let name = room_name_or_default(name);

        let room = self
            .rooms
            .create_room(&slug, &credential, &name, expires_at)
            .await?;
        self.kv
            .put(&owner_credential_key(&room.slug), &credential)
            .await?;
        info!(slug = %room.slug, room_id = room.room_id.0, "created room");
        Ok(ResolvedRoom { room, owned: true })
    }

    /// Resolves a slug to its room, plus whether this device holds the
    /// matching owner credential.
    pub async fn resolve(&self, slug: &Slug) -> Result<ResolvedRoom, SessionError> {
        let room = self.rooms.room_by_slug(slug).await?;
        let owned = self.stored_credential(slug).await?.is_some();
        Ok(ResolvedRoom { room, owned })
    }

    /// Renames the room. An empty name after trimming is rejected locally;
    /// everything else is up to the store's credential check. The renamed
    /// value reaches this client back through the event stream like any
    /// other subscriber.
    pub async fn rename(&self, room: &RoomSnapshot, new_name: &str) -> Result<(), SessionError> {
        let name = new_name.trim();
        if name.is_empty() {
            return Err(SessionError::Invalid(
                "room name cannot be empty".to_string(),
            ));
        }
        let credential = self.require_credential(&room.slug).await?;
        self.rooms.rename_room(room.room_id, &credential, name).await?;
        Ok(())
    }

    /// Deletes the room and forgets the credential. Deletion is terminal;
    /// the slug stops resolving for everyone.
    pub async fn delete(&self, room: &RoomSnapshot) -> Result<(), SessionError> {
        let credential = self.require_credential(&room.slug).await?;
        self.rooms.delete_room(room.room_id, &credential).await?;
        self.kv.remove(&owner_credential_key(&room.slug)).await?;
        info!(slug = %room.slug, "deleted room");
        Ok(())
    }

    async fn stored_credential(&self, slug: &Slug) -> Result<Option<String>, SessionError> {
        Ok(self.kv.get(&owner_credential_key(slug)).await?)
    }

    /// A device with no stored credential cannot possibly pass the store's
    /// check, so the refusal happens here without a round trip.
    async fn require_credential(&self, slug: &Slug) -> Result<String, SessionError> {
        self.stored_credential(slug)
            .await?
            .ok_or(SessionError::Unauthorized)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
