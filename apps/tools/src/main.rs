use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::domain::Slug;
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/tamariba.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Every room in the store, expired or not.
    ListRooms,
    /// Delete rooms whose expiry has passed, as the server sweep does.
    PurgeExpired,
    /// Delete one room by slug, owner credential not required.
    DeleteRoom { slug: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::ListRooms => {
            let now = Utc::now();
            for room in storage.list_rooms().await? {
                let state = if room.expires_at <= now {
                    "expired"
                } else {
                    "open"
                };
                println!(
                    "{} id={} {state} expires={} name={}",
                    room.slug, room.room_id.0, room.expires_at, room.name
                );
            }
        }
        Command::PurgeExpired => {
            let removed = storage.delete_expired_rooms(Utc::now()).await?;
            println!("purged {} rooms", removed.len());
        }
        Command::DeleteRoom { slug } => {
            let slug = Slug::parse(&slug)?;
            match storage.room_by_slug(&slug).await? {
                Some(room) => {
                    storage.purge_room(room.room_id).await?;
                    println!("deleted {slug} id={}", room.room_id.0);
                }
                None => println!("no room {slug}"),
            }
        }
    }

    Ok(())
}
