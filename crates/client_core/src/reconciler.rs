//! Room state synchronization: one initial fetch, then the event stream,
//! with automatic recovery when the stream drops.
//!
//! The pure fold lives in [`RoomView`]; [`RoomWatcher`] owns the background
//! task that feeds it and fans change notifications out to the UI.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use shared::domain::{MessageId, RoomId};
use shared::protocol::{MessagePayload, RoomEvent, RoomSnapshot};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::ports::{ChangeFeed, EventSubscription, MessageStore, StoreError};
use crate::projector::{project_threads, ThreadView};

/// Delay between recovery attempts after the event stream drops.
const RESYNC_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Consecutive recovery failures before the view is flagged stale.
const STALE_AFTER_FAILURES: u32 = 3;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Locally reconstructed state of one room: the display name plus the
/// message log in commit order, deduplicated by message id. Messages are
/// only ever appended or wholesale replaced by a fresh fetch; nothing edits
/// or removes a message once it is in.
#[derive(Debug, Clone)]
pub struct RoomView {
    room_id: RoomId,
    name: String,
    messages: Vec<MessagePayload>,
    seen: HashSet<MessageId>,
    stale: bool,
}

impl RoomView {
    pub fn new(room: &RoomSnapshot) -> Self {
        Self {
            room_id: room.room_id,
            name: room.name.clone(),
            messages: Vec::new(),
            seen: HashSet::new(),
            stale: false,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    /// True while recovery keeps failing and the log may be missing events.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Replaces the log with a full fetch, re-running deduplication so that
    /// events racing the fetch fold in cleanly afterwards.
    pub fn reset_messages(&mut self, messages: Vec<MessagePayload>) {
        self.seen.clear();
        self.messages.clear();
        for message in messages {
            if self.seen.insert(message.message_id) {
                self.messages.push(message);
            }
        }
    }

    /// Folds one delivered event into the view. A redelivered append is
    /// recognized by id and ignored, reported by returning false. A rename
    /// always replaces the name; the stream's delivery order is the store's
    /// commit order, so the last one delivered wins.
    pub fn apply(&mut self, event: &RoomEvent) -> bool {
        match event {
            RoomEvent::MessageAppended { message } => {
                if !self.seen.insert(message.message_id) {
                    return false;
                }
                self.messages.push(message.clone());
                true
            }
            RoomEvent::RoomRenamed { name } => {
                self.name = name.clone();
                true
            }
        }
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn clear_stale(&mut self) {
        self.stale = false;
    }

    /// Current two-level thread projection of the log.
    pub fn threads(&self) -> ThreadView {
        project_threads(&self.messages)
    }
}

/// Change notifications fanned out to whoever is showing the room.
#[derive(Debug, Clone)]
pub enum RoomUpdate {
    MessageAppended(MessagePayload),
    NameChanged(String),
    /// Recovery has failed repeatedly; what is on screen may be missing
    /// events until a `Resynced` follows.
    ViewStale,
    /// A replacement fetch brought the view back up to date. Consumers
    /// re-read the snapshot; events that landed during the outage are not
    /// replayed one by one.
    Resynced,
    /// The room no longer exists upstream. No further updates will come.
    RoomClosed,
}

/// Keeps one room's [`RoomView`] in step with the store. Starts from a full
/// fetch, then folds the event stream in; when the stream drops it
/// re-subscribes, re-fetches and carries on. Dropping the watcher (or
/// calling [`detach`](Self::detach)) stops the background task and releases
/// the subscription with it.
#[derive(Debug)]
pub struct RoomWatcher {
    state: Arc<Mutex<RoomView>>,
    updates: broadcast::Sender<RoomUpdate>,
    task: JoinHandle<()>,
}

impl RoomWatcher {
    /// Brings the room up: one full fetch, then the subscription, in that
    /// order. Either step failing means no watcher and no partial view.
    pub async fn start(
        room: &RoomSnapshot,
        messages: Arc<dyn MessageStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Result<Self, SyncError> {
        let log = messages
            .list_messages(room.room_id)
            .await
            .map_err(SyncError::InitialFetch)?;
        let subscription = feed
            .subscribe(room.room_id)
            .await
            .map_err(SyncError::InitialSubscribe)?;

        let mut view = RoomView::new(room);
        view.reset_messages(log);
        let state = Arc::new(Mutex::new(view));
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let task = tokio::spawn(sync_room(
            room.room_id,
            Arc::clone(&state),
            updates.clone(),
            messages,
            feed,
            subscription,
        ));

        Ok(Self {
            state,
            updates,
            task,
        })
    }

    /// Receiver for updates from here on. Late subscribers catch up through
    /// [`snapshot`](Self::snapshot) rather than replay.
    pub fn updates(&self) -> broadcast::Receiver<RoomUpdate> {
        self.updates.subscribe()
    }

    /// A point-in-time copy of the reconstructed room state.
    pub async fn snapshot(&self) -> RoomView {
        self.state.lock().await.clone()
    }

    /// Current thread projection, from a fresh snapshot.
    pub async fn threads(&self) -> ThreadView {
        self.state.lock().await.threads()
    }

    /// Stops synchronization. Equivalent to dropping the watcher.
    pub fn detach(self) {}
}

impl Drop for RoomWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn sync_room(
    room_id: RoomId,
    state: Arc<Mutex<RoomView>>,
    updates: broadcast::Sender<RoomUpdate>,
    messages: Arc<dyn MessageStore>,
    feed: Arc<dyn ChangeFeed>,
    mut subscription: EventSubscription,
) {
    loop {
        while let Some(event) = subscription.next_event().await {
            let applied = {
                let mut view = state.lock().await;
                view.apply(&event)
            };
            if !applied {
                continue;
            }
            let update = match event {
                RoomEvent::MessageAppended { message } => RoomUpdate::MessageAppended(message),
                RoomEvent::RoomRenamed { name } => RoomUpdate::NameChanged(name),
            };
            let _ = updates.send(update);
        }

        warn!(room_id = room_id.0, "room event stream ended; resynchronizing");
        subscription = match recover(room_id, &state, &updates, &messages, &feed).await {
            Some(replacement) => replacement,
            None => return,
        };
    }
}

/// Re-subscribe first, then re-fetch: anything committed after the fetch is
/// covered by the new subscription, and anything delivered twice over is
/// dropped by id. Keeps trying until it works; returns `None` when the room
/// turns out to be gone.
async fn recover(
    room_id: RoomId,
    state: &Arc<Mutex<RoomView>>,
    updates: &broadcast::Sender<RoomUpdate>,
    messages: &Arc<dyn MessageStore>,
    feed: &Arc<dyn ChangeFeed>,
) -> Option<EventSubscription> {
    let mut failures: u32 = 0;
    loop {
        match try_resync(room_id, state, messages, feed).await {
            Ok(subscription) => {
                state.lock().await.clear_stale();
                let _ = updates.send(RoomUpdate::Resynced);
                info!(room_id = room_id.0, "room view resynchronized");
                return Some(subscription);
            }
            Err(StoreError::NotFound) => {
                info!(room_id = room_id.0, "room is gone; ending synchronization");
                let _ = updates.send(RoomUpdate::RoomClosed);
                return None;
            }
            Err(err) => {
                failures += 1;
                warn!(room_id = room_id.0, failures, error = %err, "room resync failed");
                if failures == STALE_AFTER_FAILURES {
                    state.lock().await.mark_stale();
                    let _ = updates.send(RoomUpdate::ViewStale);
                }
                tokio::time::sleep(RESYNC_RETRY_DELAY).await;
            }
        }
    }
}

async fn try_resync(
    room_id: RoomId,
    state: &Arc<Mutex<RoomView>>,
    messages: &Arc<dyn MessageStore>,
    feed: &Arc<dyn ChangeFeed>,
) -> Result<EventSubscription, StoreError> {
    let subscription = feed.subscribe(room_id).await?;
    let log = messages.list_messages(room_id).await?;
    state.lock().await.reset_messages(log);
    Ok(subscription)
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
