use anyhow::Context;
use clap::Parser;
use inline_store::{MessageKey, MessageStore, Peer};
use inline_sync::{
    CacheConfig, ChangeSet, ConversationCache, ConversationHandle, EventBus, LoadDirection,
    MessageWriter,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(short, long, default_value = "inline-store.db")]
    db: PathBuf,

    /// User id of the conversation
    #[arg(short, long, default_value = "1")]
    user: i64,

    /// Messages loaded when the window opens
    #[arg(short, long, default_value = "50")]
    limit: usize,

    /// Keep the window newest-first
    #[arg(short, long)]
    reversed: bool,

    /// Delay before the simulated server confirms a send, in milliseconds
    #[arg(long, default_value = "500")]
    echo_delay: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();
    let peer = Peer::User(args.user);

    let store = Arc::new(
        MessageStore::new(args.db.clone())
            .await
            .with_context(|| format!("Failed to open {}", args.db.display()))?,
    );
    let bus = EventBus::new();
    let writer = MessageWriter::new(store.clone(), bus.clone());

    let config = CacheConfig::default()
        .initial_limit(args.limit)
        .reversed(args.reversed);
    let handle = ConversationHandle::spawn(ConversationCache::open(peer, store, &bus, config));

    let _token = handle
        .observe(|change: ChangeSet| match serde_json::to_string(&change) {
            Ok(json) => println!("change: {}", json),
            Err(e) => eprintln!("Failed to encode change-set: {}", e),
        })
        .await?;

    let snapshot = handle.snapshot().await?;
    println!("Conversation {} with {} messages", peer, snapshot.messages.len());
    for message in &snapshot.messages {
        println!(
            "  [{}] {:?}: {}",
            message.date,
            message.key(),
            message.text.as_deref().unwrap_or("")
        );
    }
    println!("Commands: /older /newer /bottom on|off /delete <global id> /reload /quit");

    let next_global_id = Arc::new(AtomicI64::new(
        snapshot
            .messages
            .iter()
            .filter_map(|m| m.global_id)
            .max()
            .unwrap_or(0)
            + 1,
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let mut parts = line.splitn(2, ' ');

        match (parts.next(), parts.next()) {
            (Some(""), _) => {}
            (Some("/quit"), _) => break,
            (Some("/older"), _) => {
                let merged = handle.load_batch(LoadDirection::Older).await?;
                println!("Loaded {} older messages", merged);
            }
            (Some("/newer"), _) => {
                let merged = handle.load_batch(LoadDirection::Newer).await?;
                println!("Loaded {} newer messages", merged);
            }
            (Some("/bottom"), Some(state)) => {
                handle.set_at_bottom(state == "on").await?;
            }
            (Some("/delete"), Some(id)) => match id.parse::<i64>() {
                Ok(id) => {
                    let removed = writer.delete(peer, vec![MessageKey::Global(id)]).await?;
                    println!("Deleted {} rows", removed.len());
                }
                Err(e) => eprintln!("Invalid id {}: {}", id, e),
            },
            (Some("/reload"), _) => writer.reload(peer),
            (Some(command), _) if command.starts_with('/') => {
                eprintln!("Unknown command: {}", line);
            }
            _ => {
                let placeholder = writer.send_text(peer, args.user, line).await?;
                let Some(random_id) = placeholder.random_id else {
                    continue;
                };

                // stand-in for the network round trip
                let writer = writer.clone();
                let next_global_id = next_global_id.clone();
                let delay = Duration::from_millis(args.echo_delay);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let global_id = next_global_id.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = writer.confirm_sent(peer, random_id, global_id).await {
                        eprintln!("Failed to confirm message {}: {}", random_id, e);
                    }
                });
            }
        }
    }

    handle.close();
    Ok(())
}
