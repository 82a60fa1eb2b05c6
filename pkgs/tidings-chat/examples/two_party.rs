use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tidings_chat::{
    InMemoryBlobStorage, InMemoryProfiles, Messenger, MessengerConfig, Profile, StaticIdentity,
};
use tidings_realtime::{ChannelEvent, RealtimeHub};
use tidings_store::{
    ChangeSink, MessageDraft, MessagingStores, Namespace, PinnedContext, RowChange, StoreConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Two users chatting over one local database", long_about = None)]
struct Args {
    /// SQLite database file (default: a temporary file)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Namespace to chat in
    #[arg(short, long, default_value = "general")]
    namespace: String,

    /// Listing id to pin to the conversation
    #[arg(short, long)]
    item: Option<String>,

    /// Number of messages alice sends
    #[arg(short, long, default_value = "3")]
    messages: usize,
}

fn messenger(
    user: &str,
    stores: &MessagingStores,
    hub: &Arc<RealtimeHub>,
    profiles: &Arc<InMemoryProfiles>,
) -> Messenger {
    Messenger::new(
        stores.clone(),
        hub.clone(),
        Arc::new(StaticIdentity::signed_in(user)),
        profiles.clone(),
        Arc::new(InMemoryBlobStorage::new()),
        MessengerConfig::default(),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();

    let temp = tempfile::NamedTempFile::new()?;
    let db_path = args.db.clone().unwrap_or_else(|| temp.path().to_path_buf());
    println!("Database: {}", db_path.display());

    let hub = Arc::new(RealtimeHub::new());
    let sink: Arc<dyn ChangeSink> = hub.clone();
    let config = StoreConfig {
        db_path,
        namespace: Namespace::new(args.namespace.clone()),
        ..Default::default()
    };
    let stores = MessagingStores::open(config, Some(sink))
        .await
        .context("opening stores")?;

    let profiles = Arc::new(InMemoryProfiles::new());
    for (id, name) in [("alice", "Alice"), ("bob", "Bob")] {
        profiles.insert(Profile {
            user_id: id.into(),
            display_name: name.into(),
            avatar_url: None,
        });
    }

    let alice = messenger("alice", &stores, &hub, &profiles);
    let bob = messenger("bob", &stores, &hub, &profiles);

    let bob_presence = bob.presence_tracker()?;
    bob_presence.start();

    // Bob learns about the new conversation from his inbox
    let (_inbox, mut inbox_events) = bob.watch_inbox().await?;

    let pinned = args.item.map(|id| PinnedContext::new(id).with_title("Pinned listing"));
    let alice_chat = alice.open_chat("bob", pinned).await?;
    println!("Conversation: {}", alice_chat.conversation_id());

    for n in 1..=args.messages {
        let entry = alice_chat
            .send(MessageDraft::text(format!("Message {} from alice", n)))
            .await?;
        println!("alice -> {:?}", entry.message().map(|m| m.id.as_str()));
    }

    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    let mut seen = 0;
    while seen < args.messages {
        tokio::select! {
            _ = &mut deadline => break,
            event = inbox_events.recv() => match event {
                Some(ChannelEvent::Change(RowChange::MessageInserted(m))) => {
                    seen += 1;
                    println!("bob's inbox: {} says {:?}", m.sender_id, m.content);
                }
                Some(ChannelEvent::Change(RowChange::ParticipantAdded(p))) => {
                    println!("bob joined {}", p.conversation_id);
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    let bob_chat = bob.open_conversation(alice_chat.conversation_id()).await?;
    println!("bob unread: {}", bob_chat.unread_count().await?);
    bob_chat.send(MessageDraft::text("Got them, thanks!")).await?;
    bob_chat.mark_as_read().await?;
    println!("bob unread after reading: {}", bob_chat.unread_count().await?);

    for summary in alice.conversation_list().await? {
        println!(
            "alice's list: {} with {} ({} unread): {:?}",
            summary.conversation.id,
            summary
                .peer
                .map(|p| p.display_name)
                .unwrap_or_else(|| "?".into()),
            summary.unread_count,
            summary.last_message.and_then(|m| m.content),
        );
    }

    let presence = alice.presence_of(&["bob".to_string()]).await?;
    println!("bob is {}", presence["bob"]);

    bob_presence.stop().await;
    alice_chat.close();
    bob_chat.close();
    Ok(())
}
