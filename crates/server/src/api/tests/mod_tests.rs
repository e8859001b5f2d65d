use super::*;

use chrono::Duration;
use shared::domain::{new_owner_credential, MessageId, DEFAULT_NICKNAME, DEFAULT_ROOM_NAME};
use shared::expiry::room_expiry_after;

async fn setup() -> ApiContext {
    let storage = Storage::new("sqlite::memory:")
        .await
        .expect("in-memory storage should open");
    ApiContext {
        storage,
        public_base_url: "http://127.0.0.1:8443".to_string(),
    }
}

fn slug(text: &str) -> Slug {
    Slug::parse(text).expect("test slug should be valid")
}

async fn make_room(ctx: &ApiContext, slug_text: &str, credential: &str) -> RoomSnapshot {
    let created_at = Utc::now();
    create_room(
        ctx,
        CreateRoomRequest {
            slug: slug(slug_text),
            owner_credential: credential.to_string(),
            name: String::new(),
            expires_at: room_expiry_after(created_at),
        },
    )
    .await
    .expect("room creation should succeed")
}

fn text_message(content: &str) -> SendMessageRequest {
    SendMessageRequest {
        nickname: "もえ".to_string(),
        content: Some(content.to_string()),
        image_url: None,
        parent_id: None,
    }
}

#[tokio::test]
async fn blank_room_name_falls_back_to_the_placeholder() {
    let ctx = setup().await;
    let room = make_room(&ctx, "aaa-111", &new_owner_credential()).await;
    assert_eq!(room.name, DEFAULT_ROOM_NAME);

    let resolved = resolve_room(&ctx, &slug("aaa-111"))
        .await
        .expect("resolve should succeed");
    assert_eq!(resolved.room_id, room.room_id);
    assert_eq!(resolved.name, DEFAULT_ROOM_NAME);
}

#[tokio::test]
async fn empty_owner_credential_is_rejected() {
    let ctx = setup().await;
    let err = create_room(
        &ctx,
        CreateRoomRequest {
            slug: slug("aaa-111"),
            owner_credential: "   ".to_string(),
            name: "夜会".to_string(),
            expires_at: Utc::now() + Duration::hours(6),
        },
    )
    .await
    .expect_err("blank credential should be rejected");
    assert!(matches!(err.code, ErrorCode::Validation));
}

#[tokio::test]
async fn duplicate_slug_is_a_conflict() {
    let ctx = setup().await;
    make_room(&ctx, "aaa-111", &new_owner_credential()).await;

    let err = create_room(
        &ctx,
        CreateRoomRequest {
            slug: slug("aaa-111"),
            owner_credential: new_owner_credential(),
            name: "別荘".to_string(),
            expires_at: Utc::now() + Duration::hours(6),
        },
    )
    .await
    .expect_err("second room with the same slug should be rejected");
    assert!(matches!(err.code, ErrorCode::Conflict));
}

#[tokio::test]
async fn resolving_an_unknown_slug_is_not_found() {
    let ctx = setup().await;
    let err = resolve_room(&ctx, &slug("zzz-999"))
        .await
        .expect_err("unknown slug should not resolve");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn rename_requires_the_owner_credential() {
    let ctx = setup().await;
    let credential = new_owner_credential();
    let room = make_room(&ctx, "aaa-111", &credential).await;

    let err = rename_room(
        &ctx,
        room.room_id,
        RenameRoomRequest {
            credential: "not-the-owner".to_string(),
            name: "乗っ取り".to_string(),
        },
    )
    .await
    .expect_err("foreign credential should not rename");
    assert!(matches!(err.code, ErrorCode::Unauthorized));
    let resolved = resolve_room(&ctx, &slug("aaa-111"))
        .await
        .expect("resolve should succeed");
    assert_eq!(resolved.name, DEFAULT_ROOM_NAME);

    let event = rename_room(
        &ctx,
        room.room_id,
        RenameRoomRequest {
            credential,
            name: "  二次会  ".to_string(),
        },
    )
    .await
    .expect("owner rename should succeed");
    assert!(matches!(event, RoomEvent::RoomRenamed { name } if name == "二次会"));
    let resolved = resolve_room(&ctx, &slug("aaa-111"))
        .await
        .expect("resolve should succeed");
    assert_eq!(resolved.name, "二次会");
}

#[tokio::test]
async fn blank_rename_is_rejected_before_the_store_sees_it() {
    let ctx = setup().await;
    let credential = new_owner_credential();
    let room = make_room(&ctx, "aaa-111", &credential).await;

    let err = rename_room(
        &ctx,
        room.room_id,
        RenameRoomRequest {
            credential,
            name: "   ".to_string(),
        },
    )
    .await
    .expect_err("blank name should be rejected");
    assert!(matches!(err.code, ErrorCode::Validation));
    let resolved = resolve_room(&ctx, &slug("aaa-111"))
        .await
        .expect("resolve should succeed");
    assert_eq!(resolved.name, DEFAULT_ROOM_NAME);
}

#[tokio::test]
async fn renaming_a_missing_room_is_not_found() {
    let ctx = setup().await;
    let err = rename_room(
        &ctx,
        RoomId(404),
        RenameRoomRequest {
            credential: new_owner_credential(),
            name: "どこにもない".to_string(),
        },
    )
    .await
    .expect_err("missing room should not rename");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn delete_requires_the_owner_credential() {
    let ctx = setup().await;
    let credential = new_owner_credential();
    let room = make_room(&ctx, "aaa-111", &credential).await;

    let err = delete_room(&ctx, room.room_id, "not-the-owner")
        .await
        .expect_err("foreign credential should not delete");
    assert!(matches!(err.code, ErrorCode::Unauthorized));
    resolve_room(&ctx, &slug("aaa-111"))
        .await
        .expect("room should still resolve");

    delete_room(&ctx, room.room_id, &credential)
        .await
        .expect("owner delete should succeed");
    let err = resolve_room(&ctx, &slug("aaa-111"))
        .await
        .expect_err("deleted room should be gone");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn a_message_needs_text_or_an_image() {
    let ctx = setup().await;
    let room = make_room(&ctx, "aaa-111", &new_owner_credential()).await;

    let err = append_message(
        &ctx,
        room.room_id,
        SendMessageRequest {
            nickname: "もえ".to_string(),
            content: Some("   ".to_string()),
            image_url: None,
            parent_id: None,
        },
    )
    .await
    .expect_err("whitespace-only message should be rejected");
    assert!(matches!(err.code, ErrorCode::Validation));

    let log = list_messages(&ctx, room.room_id)
        .await
        .expect("listing should succeed");
    assert!(log.is_empty());

    append_message(
        &ctx,
        room.room_id,
        SendMessageRequest {
            nickname: "もえ".to_string(),
            content: None,
            image_url: Some("/images/1".to_string()),
            parent_id: None,
        },
    )
    .await
    .expect("image-only message should be accepted");
}

#[tokio::test]
async fn blank_nickname_falls_back_at_send_time() {
    let ctx = setup().await;
    let room = make_room(&ctx, "aaa-111", &new_owner_credential()).await;

    let event = append_message(
        &ctx,
        room.room_id,
        SendMessageRequest {
            nickname: "  ".to_string(),
            content: Some("こんばんは".to_string()),
            image_url: None,
            parent_id: None,
        },
    )
    .await
    .expect("send should succeed");
    let RoomEvent::MessageAppended { message } = event else {
        panic!("append should produce a message event");
    };
    assert_eq!(message.nickname, DEFAULT_NICKNAME);

    let log = list_messages(&ctx, room.room_id)
        .await
        .expect("listing should succeed");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].nickname, DEFAULT_NICKNAME);
}

#[tokio::test]
async fn replies_must_target_a_root_in_the_same_room() {
    let ctx = setup().await;
    let room = make_room(&ctx, "aaa-111", &new_owner_credential()).await;
    let other = make_room(&ctx, "bbb-222", &new_owner_credential()).await;

    let RoomEvent::MessageAppended { message: root } =
        append_message(&ctx, room.room_id, text_message("根"))
            .await
            .expect("root send should succeed")
    else {
        panic!("append should produce a message event");
    };

    let mut reply = text_message("葉");
    reply.parent_id = Some(root.message_id);
    let RoomEvent::MessageAppended { message: leaf } = append_message(&ctx, room.room_id, reply)
        .await
        .expect("reply send should succeed")
    else {
        panic!("append should produce a message event");
    };
    assert_eq!(leaf.parent_id, Some(root.message_id));

    let mut nested = text_message("孫");
    nested.parent_id = Some(leaf.message_id);
    let err = append_message(&ctx, room.room_id, nested)
        .await
        .expect_err("replies to replies should be rejected");
    assert!(matches!(err.code, ErrorCode::Validation));

    let mut stray = text_message("迷子");
    stray.parent_id = Some(MessageId(4040));
    let err = append_message(&ctx, room.room_id, stray)
        .await
        .expect_err("unknown parent should be rejected");
    assert!(matches!(err.code, ErrorCode::Validation));

    let mut cross = text_message("越境");
    cross.parent_id = Some(root.message_id);
    let err = append_message(&ctx, other.room_id, cross)
        .await
        .expect_err("parent from another room should be rejected");
    assert!(matches!(err.code, ErrorCode::Validation));
}

#[tokio::test]
async fn stored_images_get_a_public_url() {
    let ctx = setup().await;
    let room = make_room(&ctx, "aaa-111", &new_owner_credential()).await;

    let uploaded = store_image(
        &ctx,
        room.room_id,
        Some("yakiniku.png"),
        Some("image/png"),
        &[0x89, 0x50, 0x4e, 0x47],
    )
    .await
    .expect("upload should succeed");
    assert_eq!(
        uploaded.url,
        format!("http://127.0.0.1:8443/images/{}", uploaded.image_id.0)
    );

    let err = store_image(&ctx, RoomId(404), Some("late.png"), None, &[1])
        .await
        .expect_err("upload into a missing room should fail");
    assert!(matches!(err.code, ErrorCode::NotFound));
}
