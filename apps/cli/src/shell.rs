//! The in-room loop: prints updates as they land, reads messages and slash
//! commands from stdin.
//!
//! A sent message is not echoed locally; it prints when it comes back
//! through the event stream, so what is on screen is always what the store
//! committed.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use client_core::{
    visible_image_url, Composer, Draft, ImageAttachment, ResolvedRoom, RoomSession, RoomUpdate,
    RoomWatcher, ThreadView,
};
use shared::domain::DEFAULT_NICKNAME;
use shared::protocol::{MessagePayload, RoomSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

#[derive(Debug, PartialEq)]
enum Flow {
    Stay,
    Leave,
}

/// One line of user input, parsed. Anything that does not start with `/` is
/// the next message.
#[derive(Debug, PartialEq)]
enum Input {
    Say(String),
    Nick(String),
    Reply { root: usize, text: String },
    Image { path: String, caption: String },
    Rename(String),
    Threads,
    Delete,
    Quit,
    Help,
    Unknown,
    Empty,
}

pub struct RoomShell {
    session: RoomSession,
    watcher: RoomWatcher,
    composer: Composer,
    room: RoomSnapshot,
    nickname: String,
}

impl RoomShell {
    /// Prints the room and its backlog, then runs the loop until the user
    /// leaves or the room closes.
    pub async fn enter(
        session: RoomSession,
        watcher: RoomWatcher,
        composer: Composer,
        resolved: ResolvedRoom,
    ) -> Result<()> {
        let ResolvedRoom { room, owned } = resolved;
        let nickname = composer.restore_nickname().await.unwrap_or_default();
        let shell = Self {
            session,
            watcher,
            composer,
            room,
            nickname,
        };
        shell.print_banner(owned);
        print_threads(&shell.watcher.threads().await, Utc::now());
        shell.run().await
    }

    async fn run(mut self) -> Result<()> {
        let mut updates = self.watcher.updates();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                update = updates.recv() => {
                    if self.on_update(update) == Flow::Leave {
                        break;
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if self.on_line(&line).await == Flow::Leave {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn print_banner(&self, owned: bool) {
        println!("== {} ({}) ==", self.room.name, self.room.slug);
        println!("closes {}", self.room.expires_at.format("%Y-%m-%d %H:%M UTC"));
        if owned {
            println!("this device holds the owner credential (/rename, /delete)");
        }
        println!("/help lists commands");
    }

    fn on_update(&self, update: Result<RoomUpdate, broadcast::error::RecvError>) -> Flow {
        match update {
            Ok(RoomUpdate::MessageAppended(message)) => print_message(&message, Utc::now()),
            Ok(RoomUpdate::NameChanged(name)) => println!("* room renamed to {name}"),
            Ok(RoomUpdate::ViewStale) => {
                println!("* connection trouble, the screen may be behind")
            }
            Ok(RoomUpdate::Resynced) => println!("* caught up, /threads reprints the room"),
            Ok(RoomUpdate::RoomClosed) => {
                println!("* this room is gone");
                return Flow::Leave;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                println!("* fell {skipped} updates behind, /threads reprints the room")
            }
            Err(broadcast::error::RecvError::Closed) => return Flow::Leave,
        }
        Flow::Stay
    }

    async fn on_line(&mut self, line: &str) -> Flow {
        match parse_input(line) {
            Input::Empty => {}
            Input::Say(text) => self.send(text, None).await,
            Input::Nick(name) => {
                self.nickname = name;
                if self.nickname.trim().is_empty() {
                    println!("* nickname cleared, messages go out as {DEFAULT_NICKNAME}");
                } else {
                    println!("* nickname set to {}", self.nickname);
                }
            }
            Input::Reply { root, text } => self.reply(root, text).await,
            Input::Image { path, caption } => self.image(&path, caption).await,
            Input::Rename(name) => match self.session.rename(&self.room, &name).await {
                // The new name comes back through the event stream.
                Ok(()) => {}
                Err(err) => println!("! rename failed: {err}"),
            },
            Input::Threads => print_threads(&self.watcher.threads().await, Utc::now()),
            Input::Delete => match self.session.delete(&self.room).await {
                Ok(()) => {
                    println!("* room deleted");
                    return Flow::Leave;
                }
                Err(err) => println!("! delete failed: {err}"),
            },
            Input::Quit => return Flow::Leave,
            Input::Help => print_help(),
            Input::Unknown => {
                println!("! unknown command");
                print_help();
            }
        }
        Flow::Stay
    }

    async fn send(&self, text: String, image: Option<ImageAttachment>) {
        let draft = Draft {
            nickname: self.nickname.clone(),
            text,
            image,
            reply_to: None,
        };
        self.dispatch(draft).await;
    }

    async fn reply(&self, root: usize, text: String) {
        let threads = self.watcher.threads().await;
        let Some(parent) = root.checked_sub(1).and_then(|i| threads.roots().get(i)) else {
            println!("! no thread #{root}, /threads numbers them");
            return;
        };
        let draft = Draft {
            nickname: self.nickname.clone(),
            text,
            image: None,
            reply_to: Some(parent.message_id),
        };
        self.dispatch(draft).await;
    }

    async fn image(&self, path: &str, caption: String) {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                println!("! cannot read {path}: {err}");
                return;
            }
        };
        let filename = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image.bin")
            .to_string();
        let attachment = ImageAttachment {
            content_type: content_type_for(&filename).to_string(),
            filename,
            bytes,
        };
        self.send(caption, Some(attachment)).await;
    }

    async fn dispatch(&self, draft: Draft) {
        let threads = self.watcher.threads().await;
        if let Err(err) = self.composer.send(&draft, &threads).await {
            println!("! not sent: {err}");
        }
    }
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };
    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };
    match command {
        "nick" => Input::Nick(args.to_string()),
        "reply" => {
            let Some((number, text)) = args.split_once(char::is_whitespace) else {
                return Input::Unknown;
            };
            match number.trim_start_matches('#').parse() {
                Ok(root) => Input::Reply {
                    root,
                    text: text.trim().to_string(),
                },
                Err(_) => Input::Unknown,
            }
        }
        "image" => {
            let (path, caption) = match args.split_once(char::is_whitespace) {
                Some((path, caption)) => (path, caption.trim()),
                None => (args, ""),
            };
            if path.is_empty() {
                Input::Unknown
            } else {
                Input::Image {
                    path: path.to_string(),
                    caption: caption.to_string(),
                }
            }
        }
        "rename" => Input::Rename(args.to_string()),
        "threads" => Input::Threads,
        "delete" => Input::Delete,
        "quit" => Input::Quit,
        "help" => Input::Help,
        _ => Input::Unknown,
    }
}

/// Content type from the filename extension. The server stores it and plays
/// it back on download, nothing more.
fn content_type_for(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// One message as a printable line, with the image link rendered only while
/// it is still visible.
fn render_line(message: &MessagePayload, now: DateTime<Utc>) -> String {
    let stamp = message.created_at.format("%H:%M");
    let mut line = format!("[{stamp}] {}", message.nickname);
    if let Some(text) = message.content.as_deref() {
        line.push_str(": ");
        line.push_str(text);
    }
    if message.image_url.is_some() {
        match visible_image_url(message, now) {
            Some(url) => {
                line.push_str("  ");
                line.push_str(url);
            }
            None => line.push_str("  (image expired)"),
        }
    }
    line
}

fn print_message(message: &MessagePayload, now: DateTime<Utc>) {
    if message.is_root() {
        println!("{}", render_line(message, now));
    } else {
        println!("  > {}", render_line(message, now));
    }
}

fn print_threads(threads: &ThreadView, now: DateTime<Utc>) {
    let roots = threads.roots();
    if roots.is_empty() {
        println!("(no messages yet)");
        return;
    }
    for (index, root) in roots.iter().enumerate() {
        println!("#{} {}", index + 1, render_line(root, now));
        for reply in threads.replies_of(root.message_id) {
            println!("  > {}", render_line(reply, now));
        }
    }
}

fn print_help() {
    println!("  <text>                 send a message");
    println!("  /reply <root#> <text>  reply under a thread (/threads numbers them)");
    println!("  /image <path> [text]   attach an image (visible for 24 hours)");
    println!("  /nick [name]           set the nickname, blank for the stock one");
    println!("  /threads               reprint the room as threads");
    println!("  /rename <name>         rename the room (owner only)");
    println!("  /delete                delete the room (owner only)");
    println!("  /quit                  leave");
}

#[cfg(test)]
#[path = "tests/shell_tests.rs"]
mod tests;
