use chrono::Utc;
use shared::{
    domain::{nickname_or_default, room_name_or_default, RoomId, Slug},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateRoomRequest, ImageUploadResponse, MessagePayload, RenameRoomRequest, RoomEvent,
        RoomSnapshot, SendMessageRequest,
    },
};
use storage::{Storage, StoredMessage, StoredRoom};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    /// Base for the public URLs handed out for uploaded images.
    pub public_base_url: String,
}

pub async fn create_room(
    ctx: &ApiContext,
    req: CreateRoomRequest,
) -> Result<RoomSnapshot, ApiError> {
    if req.owner_credential.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "owner credential cannot be empty",
        ));
    }

    let name = room_name_or_default(&req.name);
    let created_at = Utc::now();
    let room_id = ctx
        .storage
        .create_room(
            &req.slug,
            &req.owner_credential,
            &name,
            created_at,
            req.expires_at,
        )
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Conflict, "slug is already taken"))?;

    Ok(RoomSnapshot {
        room_id,
        slug: req.slug,
        name,
        created_at,
        expires_at: req.expires_at,
    })
}

pub async fn resolve_room(ctx: &ApiContext, slug: &Slug) -> Result<RoomSnapshot, ApiError> {
    let room = ctx
        .storage
        .room_by_slug(slug)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "room not found"))?;
    Ok(snapshot(room))
}

/// Renames the room and hands back the event to fan out. The store performs
/// the authoritative credential check; local ownership flags never count.
pub async fn rename_room(
    ctx: &ApiContext,
    room_id: RoomId,
    req: RenameRoomRequest,
) -> Result<RoomEvent, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "room name cannot be empty",
        ));
    }

    require_room(ctx, room_id).await?;
    let renamed = ctx
        .storage
        .rename_room(room_id, &req.credential, name)
        .await
        .map_err(internal)?;
    if !renamed {
        return Err(ApiError::new(
            ErrorCode::Unauthorized,
            "owner credential does not match",
        ));
    }

    Ok(RoomEvent::RoomRenamed {
        name: name.to_string(),
    })
}

pub async fn delete_room(
    ctx: &ApiContext,
    room_id: RoomId,
    credential: &str,
) -> Result<(), ApiError> {
    require_room(ctx, room_id).await?;
    let deleted = ctx
        .storage
        .delete_room(room_id, credential)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::new(
            ErrorCode::Unauthorized,
            "owner credential does not match",
        ));
    }
    Ok(())
}

pub async fn list_messages(
    ctx: &ApiContext,
    room_id: RoomId,
) -> Result<Vec<MessagePayload>, ApiError> {
    require_room(ctx, room_id).await?;
    let messages = ctx
        .storage
        .list_room_messages(room_id)
        .await
        .map_err(internal)?;
    Ok(messages.into_iter().map(message_payload).collect())
}

/// Appends a message and hands back the event to fan out. A message needs
/// text or an image; replies may only target root messages in the same room.
pub async fn append_message(
    ctx: &ApiContext,
    room_id: RoomId,
    req: SendMessageRequest,
) -> Result<RoomEvent, ApiError> {
    require_room(ctx, room_id).await?;

    let content = req
        .content
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let image_url = req
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());
    if content.is_none() && image_url.is_none() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "message needs text or an image",
        ));
    }

    if let Some(parent_id) = req.parent_id {
        let parent = ctx
            .storage
            .message_by_id(parent_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::new(ErrorCode::Validation, "parent message does not exist"))?;
        if parent.room_id != room_id {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "parent message belongs to another room",
            ));
        }
        if parent.parent_id.is_some() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "replies can only target root messages",
            ));
        }
    }

    let nickname = nickname_or_default(&req.nickname);
    let created_at = Utc::now();
    let message_id = ctx
        .storage
        .append_message(
            room_id,
            &nickname,
            content,
            image_url,
            req.parent_id,
            created_at,
        )
        .await
        .map_err(internal)?;

    Ok(RoomEvent::MessageAppended {
        message: MessagePayload {
            message_id,
            room_id,
            nickname,
            content: content.map(str::to_string),
            image_url: image_url.map(str::to_string),
            parent_id: req.parent_id,
            created_at,
        },
    })
}

pub async fn store_image(
    ctx: &ApiContext,
    room_id: RoomId,
    filename: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<ImageUploadResponse, ApiError> {
    require_room(ctx, room_id).await?;
    let image_id = ctx
        .storage
        .store_image(room_id, filename, content_type, bytes, Utc::now())
        .await
        .map_err(internal)?;
    Ok(ImageUploadResponse {
        image_id,
        url: format!(
            "{}/images/{}",
            ctx.public_base_url.trim_end_matches('/'),
            image_id.0
        ),
    })
}

pub async fn require_room(ctx: &ApiContext, room_id: RoomId) -> Result<StoredRoom, ApiError> {
    ctx.storage
        .room_by_id(room_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "room not found"))
}

fn snapshot(room: StoredRoom) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room.room_id,
        slug: room.slug,
        name: room.name,
        created_at: room.created_at,
        expires_at: room.expires_at,
    }
}

fn message_payload(message: StoredMessage) -> MessagePayload {
    MessagePayload {
        message_id: message.message_id,
        room_id: message.room_id,
        nickname: message.nickname,
        content: message.content,
        image_url: message.image_url,
        parent_id: message.parent_id,
        created_at: message.created_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
