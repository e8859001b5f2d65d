use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ImageId, MessageId, RoomId, Slug};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredRoom {
    pub room_id: RoomId,
    pub slug: Slug,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub nickname: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub parent_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub image_id: ImageId,
    pub room_id: RoomId,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns `None` when the slug is already taken.
    pub async fn create_room(
        &self,
        slug: &Slug,
        owner_token: &str,
        name: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<RoomId>> {
        let inserted = sqlx::query(
            "INSERT INTO rooms (slug, name, owner_token, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(slug.as_str())
        .bind(name)
        .bind(owner_token)
        .bind(created_at)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(Some(RoomId(row.get::<i64, _>(0)))),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn room_by_slug(&self, slug: &Slug) -> Result<Option<StoredRoom>> {
        let row =
            sqlx::query("SELECT id, slug, name, created_at, expires_at FROM rooms WHERE slug = ?")
                .bind(slug.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(room_from_row).transpose()
    }

    pub async fn room_by_id(&self, room_id: RoomId) -> Result<Option<StoredRoom>> {
        let row =
            sqlx::query("SELECT id, slug, name, created_at, expires_at FROM rooms WHERE id = ?")
                .bind(room_id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(room_from_row).transpose()
    }

    pub async fn list_rooms(&self) -> Result<Vec<StoredRoom>> {
        let rows =
            sqlx::query("SELECT id, slug, name, created_at, expires_at FROM rooms ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(room_from_row).collect()
    }

    /// True when the row changed; false when no room carries this id together
    /// with this owner token.
    pub async fn rename_room(
        &self,
        room_id: RoomId,
        owner_token: &str,
        name: &str,
    ) -> Result<bool> {
        let updated = sqlx::query("UPDATE rooms SET name = ? WHERE id = ? AND owner_token = ?")
            .bind(name)
            .bind(room_id.0)
            .bind(owner_token)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    /// True when the room was deleted; false when no room carries this id
    /// together with this owner token. Dependent messages and images go with
    /// the room.
    pub async fn delete_room(&self, room_id: RoomId, owner_token: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM rooms WHERE id = ? AND owner_token = ?")
            .bind(room_id.0)
            .bind(owner_token)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Operator-path delete, no owner token involved. For tooling that has
    /// the database itself in hand.
    pub async fn purge_room(&self, room_id: RoomId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(room_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Deletes every room whose expiry lies at or before `now`, returning the
    /// ids that were removed.
    pub async fn delete_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<RoomId>> {
        let rows = sqlx::query("DELETE FROM rooms WHERE expires_at <= ? RETURNING id")
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| RoomId(r.get::<i64, _>(0)))
            .collect())
    }

    pub async fn append_message(
        &self,
        room_id: RoomId,
        nickname: &str,
        content: Option<&str>,
        image_url: Option<&str>,
        parent_id: Option<MessageId>,
        created_at: DateTime<Utc>,
    ) -> Result<MessageId> {
        let rec = sqlx::query(
            "INSERT INTO messages (room_id, nickname, content, image_url, parent_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(room_id.0)
        .bind(nickname)
        .bind(content)
        .bind(image_url)
        .bind(parent_id.map(|id| id.0))
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(MessageId(rec.get::<i64, _>(0)))
    }

    pub async fn message_by_id(&self, message_id: MessageId) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            "SELECT id, room_id, nickname, content, image_url, parent_id, created_at
             FROM messages
             WHERE id = ?",
        )
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(message_from_row))
    }

    /// Full message log for a room, ascending by creation time. Ids break
    /// ties so the order is stable within one timestamp.
    pub async fn list_room_messages(&self, room_id: RoomId) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, room_id, nickname, content, image_url, parent_id, created_at
             FROM messages
             WHERE room_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(room_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    pub async fn store_image(
        &self,
        room_id: RoomId,
        filename: Option<&str>,
        content_type: Option<&str>,
        bytes: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<ImageId> {
        let rec = sqlx::query(
            "INSERT INTO images (room_id, filename, content_type, bytes, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(room_id.0)
        .bind(filename)
        .bind(content_type)
        .bind(bytes)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(ImageId(rec.get::<i64, _>(0)))
    }

    pub async fn load_image(&self, image_id: ImageId) -> Result<Option<StoredImage>> {
        let row = sqlx::query(
            "SELECT id, room_id, filename, content_type, bytes, created_at
             FROM images
             WHERE id = ?",
        )
        .bind(image_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredImage {
            image_id: ImageId(r.get::<i64, _>(0)),
            room_id: RoomId(r.get::<i64, _>(1)),
            filename: r.get::<Option<String>, _>(2),
            content_type: r.get::<Option<String>, _>(3),
            bytes: r.get::<Vec<u8>, _>(4),
            created_at: r.get::<DateTime<Utc>, _>(5),
        }))
    }
}

fn room_from_row(row: SqliteRow) -> Result<StoredRoom> {
    let slug = Slug::parse(&row.get::<String, _>(1)).context("malformed slug in rooms table")?;
    Ok(StoredRoom {
        room_id: RoomId(row.get::<i64, _>(0)),
        slug,
        name: row.get::<String, _>(2),
        created_at: row.get::<DateTime<Utc>, _>(3),
        expires_at: row.get::<DateTime<Utc>, _>(4),
    })
}

fn message_from_row(row: SqliteRow) -> StoredMessage {
    StoredMessage {
        message_id: MessageId(row.get::<i64, _>(0)),
        room_id: RoomId(row.get::<i64, _>(1)),
        nickname: row.get::<String, _>(2),
        content: row.get::<Option<String>, _>(3),
        image_url: row.get::<Option<String>, _>(4),
        parent_id: row.get::<Option<i64>, _>(5).map(MessageId),
        created_at: row.get::<DateTime<Utc>, _>(6),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
