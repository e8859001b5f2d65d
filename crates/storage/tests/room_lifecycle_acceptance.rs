use chrono::Utc;
use shared::domain::Slug;
use shared::expiry::room_expiry_after;
use storage::Storage;

#[tokio::test]
async fn room_create_chat_rename_delete_acceptance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("tamariba.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
    let storage = Storage::new(&database_url).await.expect("db");

    let created_at = Utc::now();
    let slug = Slug::parse("kai-042").expect("slug");
    let room = storage
        .create_room(
            &slug,
            "owner-token",
            "たまりば",
            created_at,
            room_expiry_after(created_at),
        )
        .await
        .expect("create room")
        .expect("slug free");

    let bystander = storage
        .create_room(
            &Slug::parse("umi-777").expect("slug"),
            "other-token",
            "となり",
            created_at,
            room_expiry_after(created_at),
        )
        .await
        .expect("create bystander")
        .expect("slug free");

    let root = storage
        .append_message(room, "umi", Some("こんばんは"), None, None, Utc::now())
        .await
        .expect("root");
    let _reply = storage
        .append_message(room, "kai", Some("おつかれ"), None, Some(root), Utc::now())
        .await
        .expect("reply");
    let image_id = storage
        .store_image(room, Some("dinner.jpg"), Some("image/jpeg"), b"jpeg", Utc::now())
        .await
        .expect("image");
    storage
        .append_message(
            room,
            "umi",
            None,
            Some(&format!("/images/{}", image_id.0)),
            None,
            Utc::now(),
        )
        .await
        .expect("image message");

    let log = storage.list_room_messages(room).await.expect("messages");
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].message_id, root);
    assert_eq!(log[1].parent_id, Some(root));
    assert!(log[2].image_url.is_some());

    assert!(!storage
        .rename_room(room, "not-the-owner", "のっとり")
        .await
        .expect("denied rename"));
    let unchanged = storage
        .room_by_id(room)
        .await
        .expect("lookup")
        .expect("room");
    assert_eq!(unchanged.name, "たまりば");

    assert!(storage
        .rename_room(room, "owner-token", "二次会")
        .await
        .expect("rename"));
    let renamed = storage
        .room_by_slug(&slug)
        .await
        .expect("lookup")
        .expect("room");
    assert_eq!(renamed.name, "二次会");

    assert!(!storage
        .delete_room(room, "not-the-owner")
        .await
        .expect("denied delete"));
    assert!(storage
        .delete_room(room, "owner-token")
        .await
        .expect("delete"));

    assert!(storage.room_by_slug(&slug).await.expect("lookup").is_none());
    assert!(storage
        .message_by_id(root)
        .await
        .expect("lookup")
        .is_none());
    assert!(storage.load_image(image_id).await.expect("lookup").is_none());

    let untouched = storage
        .room_by_id(bystander)
        .await
        .expect("lookup")
        .expect("bystander survives");
    assert_eq!(untouched.name, "となり");
    assert_eq!(
        untouched.expires_at,
        room_expiry_after(created_at),
        "expiry is the instant computed at creation"
    );
}
