//! Two-level thread projection over a room's message log.
//!
//! A pure function of the ordered message collection; it is re-run from
//! scratch on every state change rather than patched incrementally, so a
//! freshly delivered reply lands under its root without any invalidation
//! bookkeeping.

use std::collections::{HashMap, HashSet};

use shared::domain::MessageId;
use shared::protocol::MessagePayload;

/// Presentation shape of a room: root messages in creation order, with each
/// root's replies grouped under it, also in creation order.
#[derive(Debug, Clone, Default)]
pub struct ThreadView {
    roots: Vec<MessagePayload>,
    replies: HashMap<MessageId, Vec<MessagePayload>>,
}

impl ThreadView {
    pub fn roots(&self) -> &[MessagePayload] {
        &self.roots
    }

    pub fn replies_of(&self, root: MessageId) -> &[MessagePayload] {
        self.replies.get(&root).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reply_count(&self, root: MessageId) -> usize {
        self.replies_of(root).len()
    }

    pub fn is_root(&self, id: MessageId) -> bool {
        self.roots.iter().any(|message| message.message_id == id)
    }
}

/// Projects the message collection into its two-level thread shape.
///
/// A reply whose parent is not among the roots is left out entirely rather
/// than promoted to a pseudo-root. That can happen transiently when a reply
/// is delivered before its root is locally visible; the reply reappears on
/// the projection run after the root arrives. This window is a known gap,
/// accepted instead of guarded against.
pub fn project_threads(messages: &[MessagePayload]) -> ThreadView {
    let mut roots = Vec::new();
    let mut root_ids = HashSet::new();
    for message in messages {
        if message.is_root() {
            root_ids.insert(message.message_id);
            roots.push(message.clone());
        }
    }

    let mut replies: HashMap<MessageId, Vec<MessagePayload>> = HashMap::new();
    for message in messages {
        if let Some(parent_id) = message.parent_id {
            if root_ids.contains(&parent_id) {
                replies.entry(parent_id).or_default().push(message.clone());
            }
        }
    }

    ThreadView { roots, replies }
}

#[cfg(test)]
#[path = "tests/projector_tests.rs"]
mod tests;
