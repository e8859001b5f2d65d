use chrono::TimeDelta;
use shared::domain::{MessageId, RoomId};

use super::*;

fn message(content: Option<&str>, image_url: Option<&str>) -> MessagePayload {
    MessagePayload {
        message_id: MessageId(1),
        room_id: RoomId(1),
        nickname: "umi".to_string(),
        content: content.map(str::to_string),
        image_url: image_url.map(str::to_string),
        parent_id: None,
        created_at: Utc::now(),
    }
}

#[test]
fn plain_lines_are_messages_and_blank_lines_are_nothing() {
    assert_eq!(
        parse_input("  hello there  "),
        Input::Say("hello there".to_string())
    );
    assert_eq!(parse_input("   "), Input::Empty);
}

#[test]
fn slash_commands_parse_with_their_arguments() {
    assert_eq!(parse_input("/nick umi"), Input::Nick("umi".to_string()));
    assert_eq!(parse_input("/nick"), Input::Nick(String::new()));
    assert_eq!(parse_input("/rename 夜会"), Input::Rename("夜会".to_string()));
    assert_eq!(parse_input("/threads"), Input::Threads);
    assert_eq!(parse_input("/delete"), Input::Delete);
    assert_eq!(parse_input("/quit"), Input::Quit);
    assert_eq!(parse_input("/help"), Input::Help);
}

#[test]
fn reply_takes_a_root_number_with_or_without_the_hash() {
    assert_eq!(
        parse_input("/reply 2 sounds good"),
        Input::Reply {
            root: 2,
            text: "sounds good".to_string()
        }
    );
    assert_eq!(
        parse_input("/reply #10 same here"),
        Input::Reply {
            root: 10,
            text: "same here".to_string()
        }
    );
    assert_eq!(parse_input("/reply nope hi"), Input::Unknown);
    assert_eq!(parse_input("/reply 2"), Input::Unknown);
}

#[test]
fn image_takes_a_path_and_an_optional_caption() {
    assert_eq!(
        parse_input("/image cat.png look at this"),
        Input::Image {
            path: "cat.png".to_string(),
            caption: "look at this".to_string()
        }
    );
    assert_eq!(
        parse_input("/image cat.png"),
        Input::Image {
            path: "cat.png".to_string(),
            caption: String::new()
        }
    );
    assert_eq!(parse_input("/image"), Input::Unknown);
}

#[test]
fn unknown_commands_are_flagged_rather_than_sent_as_text() {
    assert_eq!(parse_input("/frobnicate now"), Input::Unknown);
}

#[test]
fn content_types_come_from_the_extension() {
    assert_eq!(content_type_for("cat.PNG"), "image/png");
    assert_eq!(content_type_for("pic.jpeg"), "image/jpeg");
    assert_eq!(content_type_for("anim.gif"), "image/gif");
    assert_eq!(content_type_for("shot.webp"), "image/webp");
    assert_eq!(content_type_for("notes.txt"), "application/octet-stream");
    assert_eq!(content_type_for("noext"), "application/octet-stream");
}

#[test]
fn image_links_render_only_while_still_visible() {
    let message = message(Some("look"), Some("http://x/images/9"));
    let sent = message.created_at;

    let line = render_line(&message, sent);
    assert!(line.contains("umi: look"));
    assert!(line.contains("http://x/images/9"));

    // Exactly 24 hours old is still on screen; a second past is not.
    let line = render_line(&message, sent + TimeDelta::hours(24));
    assert!(line.contains("http://x/images/9"));

    let line = render_line(&message, sent + TimeDelta::hours(24) + TimeDelta::seconds(1));
    assert!(!line.contains("http://x/images/9"));
    assert!(line.contains("(image expired)"));
}

#[test]
fn image_only_messages_still_render_the_sender() {
    let message = message(None, Some("http://x/images/3"));
    let line = render_line(&message, message.created_at);
    assert!(line.contains("umi"));
    assert!(line.contains("http://x/images/3"));
}
