mod commands;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use murmur_gateway::LocalBackend;
use murmur_sync::{PresenceTracker, Session, SyncConfig};
use murmur_types::ConversationKey;

use crate::commands::{Command, HELP};
use crate::render::Renderer;

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they do not interleave with the timeline
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let config = SyncConfig::from_env();
    let db_path = std::env::var("MURMUR_DB_PATH").unwrap_or_else(|_| "murmur.db".into());
    let user_id: Uuid = match std::env::var("MURMUR_USER_ID") {
        Ok(raw) => raw.parse()?,
        Err(_) => Uuid::new_v4(),
    };
    let display_name = std::env::var("MURMUR_DISPLAY_NAME").ok();

    let backend = LocalBackend::open(&PathBuf::from(&db_path))?;
    if display_name.is_some() {
        backend
            .upsert_profile(user_id, display_name.as_deref(), None)
            .await?;
    }

    let client = Arc::new(backend.connect(user_id));
    let session = Session::new(client.clone(), user_id, config.clone());
    let payload = backend.presence_payload(user_id).await?;
    info!("Signed in as {} ({})", payload.display_name, user_id);
    let tracker = PresenceTracker::start(client, payload, config).await?;

    let renderer = tokio::spawn(render_loop(session.clone()));
    if let Err(e) = session.select_conversation(ConversationKey::Broadcast).await {
        warn!("Could not load the room: {}", e);
    }
    println!("you are {}", user_id);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match run(&session, &tracker, command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    if let Err(e) = tracker.sign_out().await {
        warn!("Sign out failed: {}", e);
    }
    session.shutdown().await;
    renderer.abort();
    Ok(())
}

async fn run(session: &Session, tracker: &PresenceTracker, command: Command) -> Result<Flow> {
    let self_id = session.user_id();
    match command {
        Command::Send(body) => {
            session.send(&body).await?;
            tracker.message_sent().await?;
        }
        Command::Global => session.select_conversation(ConversationKey::Broadcast).await?,
        Command::Direct(peer) => {
            session
                .select_conversation(ConversationKey::direct(self_id, peer))
                .await?
        }
        Command::Older => {
            let added = session.load_older().await?;
            if added == 0 && !session.has_more().await {
                println!("(no older messages)");
            }
        }
        Command::Edit(reference, body) => {
            let id = resolve(session, &reference).await?;
            session.edit(id, &body).await?;
        }
        Command::Delete(reference) => {
            let id = resolve(session, &reference).await?;
            session.delete(id).await?;
        }
        Command::React(reference, emoji) => {
            let id = resolve(session, &reference).await?;
            session.toggle_reaction(id, &emoji).await?;
        }
        Command::Who => {
            for entry in tracker.online_users().await {
                let you = if entry.user_id == self_id { " (you)" } else { "" };
                println!("  {}{}  {}", entry.display_name, you, entry.user_id);
            }
            if let Some(key) = session.current_key().await {
                for typer in tracker.typing_in(&key).await {
                    println!("  {} is typing...", typer.display_name);
                }
            }
        }
        Command::Typing => {
            let Some(key) = session.current_key().await else {
                bail!("select a conversation first");
            };
            tracker.keystroke(typing_target(&key, self_id)).await?;
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Who a typing notice in `key` is addressed to: nobody in particular for
/// the room, the peer in a private conversation.
fn typing_target(key: &ConversationKey, self_id: Uuid) -> Option<Uuid> {
    key.peer_of(self_id)
}

/// Resolve a full message id or a unique prefix of one shown in the timeline.
async fn resolve(session: &Session, reference: &str) -> Result<Uuid> {
    let reference = reference.trim_start_matches('#');
    if let Ok(id) = reference.parse() {
        return Ok(id);
    }

    let matches: Vec<Uuid> = session
        .messages()
        .await
        .iter()
        .map(|m| m.id)
        .filter(|id| id.simple().to_string().starts_with(reference))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no message #{} in this conversation", reference),
        _ => bail!("#{} matches several messages, use more characters", reference),
    }
}

async fn render_loop(session: Session) {
    let mut changes = session.changes();
    let mut renderer = Renderer::new(session.user_id());
    while changes.changed().await.is_ok() {
        let key = session.current_key().await;
        let messages = session.messages().await;
        for line in renderer.update(key, &messages) {
            println!("{}", line);
        }
        if session.is_loading_older().await {
            println!("(loading older messages...)");
        }
    }
}
