use chrono::{TimeDelta, Utc};
use shared::domain::RoomId;

use super::*;

fn message(id: i64, parent: Option<i64>) -> MessagePayload {
    MessagePayload {
        message_id: MessageId(id),
        room_id: RoomId(1),
        nickname: "からあげ".to_string(),
        content: Some(format!("message {id}")),
        image_url: None,
        parent_id: parent.map(MessageId),
        created_at: Utc::now() + TimeDelta::milliseconds(id),
    }
}

fn ids(messages: &[MessagePayload]) -> Vec<i64> {
    messages.iter().map(|message| message.message_id.0).collect()
}

#[test]
fn roots_keep_log_order_and_replies_group_under_their_roots() {
    let log = vec![
        message(1, None),
        message(2, Some(1)),
        message(3, None),
        message(4, Some(1)),
        message(5, Some(3)),
    ];
    let view = project_threads(&log);

    assert_eq!(ids(view.roots()), vec![1, 3]);
    assert_eq!(ids(view.replies_of(MessageId(1))), vec![2, 4]);
    assert_eq!(ids(view.replies_of(MessageId(3))), vec![5]);
    assert_eq!(view.reply_count(MessageId(1)), 2);

    // No root ever doubles as somebody's reply.
    for root in view.roots() {
        for other in view.roots() {
            assert!(!ids(view.replies_of(other.message_id)).contains(&root.message_id.0));
        }
    }
}

#[test]
fn orphan_replies_are_left_out_until_their_root_arrives() {
    let orphan = message(7, Some(42));

    let view = project_threads(&[orphan.clone()]);
    assert!(view.roots().is_empty());
    assert_eq!(view.reply_count(MessageId(42)), 0);

    // Re-running over the log once the root has landed picks the reply up.
    let view = project_threads(&[message(42, None), orphan]);
    assert_eq!(ids(view.roots()), vec![42]);
    assert_eq!(ids(view.replies_of(MessageId(42))), vec![7]);
}

#[test]
fn replies_to_replies_are_not_grouped_anywhere() {
    let log = vec![message(1, None), message(2, Some(1)), message(3, Some(2))];
    let view = project_threads(&log);

    assert_eq!(ids(view.roots()), vec![1]);
    assert_eq!(ids(view.replies_of(MessageId(1))), vec![2]);
    assert_eq!(view.reply_count(MessageId(2)), 0);
    assert!(view.is_root(MessageId(1)));
    assert!(!view.is_root(MessageId(2)));
    assert!(!view.is_root(MessageId(3)));
}

#[test]
fn projection_is_the_same_on_every_rerun() {
    let log = vec![
        message(1, None),
        message(2, Some(1)),
        message(3, None),
        message(4, Some(3)),
    ];
    let first = project_threads(&log);
    let second = project_threads(&log);

    assert_eq!(ids(first.roots()), ids(second.roots()));
    for root in first.roots() {
        assert_eq!(
            ids(first.replies_of(root.message_id)),
            ids(second.replies_of(root.message_id))
        );
    }
}

#[test]
fn empty_log_projects_to_nothing() {
    let view = project_threads(&[]);
    assert!(view.roots().is_empty());
    assert_eq!(view.reply_count(MessageId(1)), 0);
    assert!(!view.is_root(MessageId(1)));
}
