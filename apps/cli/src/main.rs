use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    AttachmentStore, BackendClient, ChangeFeed, Composer, MessageStore, RoomSession, RoomStore,
    RoomWatcher,
};
use shared::domain::Slug;
use tracing_subscriber::EnvFilter;

mod kv;
mod shell;

use kv::FileKv;
use shell::RoomShell;

#[derive(Parser, Debug)]
struct Cli {
    /// Base URL of the room server.
    #[arg(long, default_value = "http://127.0.0.1:8443")]
    server_url: String,
    /// Where this device keeps owner credentials and nicknames.
    #[arg(long, default_value = "tamariba-device.json")]
    state_file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a room and enter it.
    Create {
        /// Room name; blank means the stock name.
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Enter an existing room by its slug, e.g. abc-123.
    Join { slug: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Chat lines own stdout; logs go to stderr and stay quiet unless asked.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let backend = Arc::new(BackendClient::new(&cli.server_url)?);
    let kv = Arc::new(FileKv::open(&cli.state_file)?);

    let rooms: Arc<dyn RoomStore> = backend.clone();
    let session = RoomSession::new(rooms, kv.clone());

    let resolved = match &cli.command {
        Command::Create { name } => session.create(name).await?,
        Command::Join { slug } => {
            let slug = Slug::parse(slug)?;
            session.resolve(&slug).await?
        }
    };

    let messages: Arc<dyn MessageStore> = backend.clone();
    let feed: Arc<dyn ChangeFeed> = backend.clone();
    let watcher = RoomWatcher::start(&resolved.room, messages, feed).await?;

    let messages: Arc<dyn MessageStore> = backend.clone();
    let attachments: Arc<dyn AttachmentStore> = backend.clone();
    let composer = Composer::new(&resolved.room, messages, attachments, kv.clone());

    RoomShell::enter(session, watcher, composer, resolved).await
}
