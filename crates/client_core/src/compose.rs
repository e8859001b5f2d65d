//! Message composition and dispatch for one room.
//!
//! The composer never owns the draft. Callers keep it across a failed send,
//! which is what makes "fix the image and retry" work without retyping.

use std::path::Path;
use std::sync::Arc;

use shared::domain::{nickname_or_default, MessageId, RoomId};
use shared::protocol::{MessagePayload, RoomSnapshot, SendMessageRequest};
use tracing::warn;
use uuid::Uuid;

use crate::error::ComposeError;
use crate::ports::{nickname_key, AttachmentStore, DeviceKv, MessageStore};
use crate::projector::ThreadView;

/// What the user has typed so far. `nickname` is kept exactly as entered;
/// the stock nickname is substituted only on the outgoing message.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub nickname: String,
    pub text: String,
    pub image: Option<ImageAttachment>,
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub struct Composer {
    room_id: RoomId,
    messages: Arc<dyn MessageStore>,
    attachments: Arc<dyn AttachmentStore>,
    kv: Arc<dyn DeviceKv>,
}

impl Composer {
    pub fn new(
        room: &RoomSnapshot,
        messages: Arc<dyn MessageStore>,
        attachments: Arc<dyn AttachmentStore>,
        kv: Arc<dyn DeviceKv>,
    ) -> Self {
        Self {
            room_id: room.room_id,
            messages,
            attachments,
            kv,
        }
    }

    /// The nickname last used in this room, exactly as it was typed. Misses
    /// and KV failures both read as "nothing stored".
    pub async fn restore_nickname(&self) -> Option<String> {
        self.kv
            .get(&nickname_key(self.room_id))
            .await
            .ok()
            .flatten()
    }

    /// Validates and sends the draft. On any failure the draft is untouched
    /// in the caller's hands; in particular an upload failure means nothing
    /// was appended and the same draft can be sent again.
    ///
    /// `threads` is the current projection, used to check that a reply
    /// targets a root. The store re-validates the same rule.
    pub async fn send(
        &self,
        draft: &Draft,
        threads: &ThreadView,
    ) -> Result<MessagePayload, ComposeError> {
        let text = draft.text.trim();
        if text.is_empty() && draft.image.is_none() {
            return Err(ComposeError::Empty);
        }
        if let Some(parent_id) = draft.reply_to {
            if text.is_empty() {
                return Err(ComposeError::ReplyNeedsText);
            }
            if !threads.is_root(parent_id) {
                return Err(ComposeError::NotARoot);
            }
        }

        // Past local validation the nickname is remembered as typed, blank
        // included, so the next visit restores what the user actually had.
        if let Err(err) = self
            .kv
            .put(&nickname_key(self.room_id), &draft.nickname)
            .await
        {
            warn!(error = %err, "failed to remember nickname");
        }

        let image_url = match &draft.image {
            Some(image) => Some(self.upload(image).await?),
            None => None,
        };

        let request = SendMessageRequest {
            nickname: nickname_or_default(&draft.nickname),
            content: (!text.is_empty()).then(|| text.to_string()),
            image_url,
            parent_id: draft.reply_to,
        };
        self.messages
            .append_message(self.room_id, request)
            .await
            .map_err(ComposeError::Store)
    }

    async fn upload(&self, image: &ImageAttachment) -> Result<String, ComposeError> {
        let path = object_path(self.room_id, &image.filename);
        self.attachments
            .upload(&path, image.bytes.clone(), &image.content_type)
            .await
            .map_err(|err| ComposeError::Upload(err.into()))
    }
}

/// Objects are filed under their room with a fresh random name; only the
/// extension survives from the original filename.
fn object_path(room_id: RoomId, filename: &str) -> String {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("bin");
    format!("{}/{}.{}", room_id.0, Uuid::new_v4(), extension)
}

#[cfg(test)]
#[path = "tests/compose_tests.rs"]
mod tests;
