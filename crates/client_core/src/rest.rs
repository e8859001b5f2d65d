//! The production port implementation: HTTP for stores and uploads, a
//! WebSocket per room for the change feed.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::StatusCode;
use shared::domain::{RoomId, Slug};
use shared::error::ApiError;
use shared::protocol::{
    CreateRoomRequest, DeleteRoomRequest, ImageUploadResponse, MessagePayload, RenameRoomRequest,
    RoomEvent, RoomSnapshot, SendMessageRequest,
};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::warn;
use url::Url;

use crate::ports::{
    AttachmentStore, ChangeFeed, EventSubscription, MessageStore, RoomStore, StoreError,
};

const SUBSCRIPTION_BUFFER: usize = 64;

/// Client for the room server. Clones share one connection pool.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    server_url: String,
}

impl BackendClient {
    /// `server_url` is the HTTP base, e.g. `http://127.0.0.1:8443`; the
    /// WebSocket address is derived from it.
    pub fn new(server_url: &str) -> Result<Self, StoreError> {
        let trimmed = server_url.trim_end_matches('/');
        let parsed = Url::parse(trimmed)
            .map_err(|err| StoreError::Invalid(format!("invalid server url: {err}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(StoreError::Invalid(
                "server url must be http or https".to_string(),
            ));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            server_url: trimmed.to_string(),
        })
    }

    fn events_url(&self, room_id: RoomId) -> String {
        let base = if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else {
            self.server_url.replacen("http://", "ws://", 1)
        };
        format!("{base}/rooms/{}/events", room_id.0)
    }
}

#[async_trait]
impl RoomStore for BackendClient {
    async fn create_room(
        &self,
        slug: &Slug,
        owner_credential: &str,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RoomSnapshot, StoreError> {
        let request = CreateRoomRequest {
            slug: slug.clone(),
            owner_credential: owner_credential.to_string(),
            name: name.to_string(),
            expires_at,
        };
        let response = self
            .http
            .post(format!("{}/rooms", self.server_url))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        response.json().await.map_err(transport)
    }

    async fn room_by_slug(&self, slug: &Slug) -> Result<RoomSnapshot, StoreError> {
        let response = self
            .http
            .get(format!("{}/rooms/{slug}", self.server_url))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        response.json().await.map_err(transport)
    }

    async fn rename_room(
        &self,
        room_id: RoomId,
        credential: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let request = RenameRoomRequest {
            credential: credential.to_string(),
            name: name.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/rooms/{}/name", self.server_url, room_id.0))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId, credential: &str) -> Result<(), StoreError> {
        let request = DeleteRoomRequest {
            credential: credential.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/rooms/{}/delete", self.server_url, room_id.0))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for BackendClient {
    async fn append_message(
        &self,
        room_id: RoomId,
        message: SendMessageRequest,
    ) -> Result<MessagePayload, StoreError> {
        let response = self
            .http
            .post(format!("{}/rooms/{}/messages", self.server_url, room_id.0))
            .json(&message)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        // The server acknowledges a send with the same event it broadcasts.
        match response.json::<RoomEvent>().await.map_err(transport)? {
            RoomEvent::MessageAppended { message } => Ok(message),
            other => Err(StoreError::Backend(anyhow!(
                "unexpected append acknowledgement: {other:?}"
            ))),
        }
    }

    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<MessagePayload>, StoreError> {
        let response = self
            .http
            .get(format!("{}/rooms/{}/messages", self.server_url, room_id.0))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        response.json().await.map_err(transport)
    }
}

#[async_trait]
impl ChangeFeed for BackendClient {
    async fn subscribe(&self, room_id: RoomId) -> Result<EventSubscription, StoreError> {
        let url = self.events_url(room_id);
        let (socket, _) = connect_async(&url).await.map_err(connect_error)?;
        let (_, mut reader) = socket.split();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pump = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<RoomEvent>(&text) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "discarding malformed room event"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "room event socket failed");
                        break;
                    }
                }
            }
        });
        Ok(EventSubscription::new(rx, pump))
    }
}

#[async_trait]
impl AttachmentStore for BackendClient {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let (room_id, object_name) = split_object_path(path)?;
        let response = self
            .http
            .post(format!("{}/rooms/{room_id}/images", self.server_url))
            .query(&[("filename", object_name), ("content_type", content_type)])
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        let uploaded: ImageUploadResponse = response.json().await.map_err(transport)?;
        Ok(uploaded.url)
    }
}

fn transport(err: reqwest::Error) -> StoreError {
    StoreError::Backend(err.into())
}

/// Maps an error response to the port taxonomy, keeping the server's own
/// message where it sent one.
async fn reject(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let message = match response.json::<ApiError>().await {
        Ok(err) => err.message,
        Err(_) => status.to_string(),
    };
    match status {
        StatusCode::UNAUTHORIZED => StoreError::Unauthorized,
        StatusCode::NOT_FOUND => StoreError::NotFound,
        StatusCode::CONFLICT => StoreError::DuplicateSlug,
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => StoreError::Invalid(message),
        _ => StoreError::Backend(anyhow!("unexpected response {status}: {message}")),
    }
}

fn connect_error(err: tungstenite::Error) -> StoreError {
    match err {
        // The server refuses the upgrade for rooms that no longer exist.
        tungstenite::Error::Http(response) if response.status().as_u16() == 404 => {
            StoreError::NotFound
        }
        other => StoreError::Backend(anyhow!("event stream connect failed: {other}")),
    }
}

/// Object paths are `{room id}/{object name}`; the upload route wants them
/// split back apart.
fn split_object_path(path: &str) -> Result<(i64, &str), StoreError> {
    let malformed = || StoreError::Invalid(format!("malformed object path: {path}"));
    let (room, name) = path.split_once('/').ok_or_else(malformed)?;
    let room_id = room.parse().map_err(|_| malformed())?;
    if name.is_empty() {
        return Err(malformed());
    }
    Ok((room_id, name))
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
