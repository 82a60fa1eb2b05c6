//! Tidings Store - persistent storage for direct messaging
//!
//! This crate provides SQLite-based persistence for one-to-one conversations
//! using Sea-ORM: conversation lookup/creation, the append-only message log,
//! per-participant read cursors and advisory presence.
//!
//! # Architecture
//!
//! - **ConversationDirectory**: resolves or atomically creates the unique direct
//!   conversation for a pair of users
//! - **MessageStore**: append, soft delete and cursor-paged reads of messages
//! - **ReadCursorStore**: monotonic `last_read_at` updates and unread counts
//! - **PresenceStore**: heartbeat upserts of online/away/offline status
//!
//! Every store is bound to a [`Namespace`], so the general and marketplace
//! messaging surfaces run on the same code against the same tables.
//! Committed changes are handed to an optional [`ChangeSink`], which is how
//! the realtime layer learns about inserts and soft deletes.
//!
//! # Database Schema
//!
//! - `conversations`: conversation rows with namespace, kind and pinned item
//! - `conversation_participants`: membership, role and read cursor
//! - `messages`: message log with soft-delete timestamp and correlation id
//! - `presence`: last heartbeat per user
//! - `direct_conversation_keys`: one row per direct pair, enforcing uniqueness
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use tidings_store::{MessageDraft, MessageLog, MessagingStores, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig {
//!     db_path: "tidings.db".into(),
//!     ..Default::default()
//! };
//!
//! let stores = MessagingStores::open(config, None).await?;
//! let conversation_id = stores
//!     .directory
//!     .find_or_create_direct("alice", "bob", None)
//!     .await?;
//! stores
//!     .messages
//!     .append(&conversation_id, "alice", MessageDraft::text("Hello!"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod entities;
pub mod error;
pub mod message_store;
pub mod migration;
pub mod models;
pub mod presence_store;
pub mod read_cursor_store;
pub mod repository;

use std::path::PathBuf;
use std::sync::Arc;

use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde::Deserialize;
use tracing::info;

pub use directory::{direct_key, ConversationDirectory};
pub use error::{MessagingError, Result};
pub use message_store::MessageStore;
pub use models::{
    now_millis, ChangeOperation, Conversation, ConversationKind, Message, MessageCursor,
    MessageDraft, MessageKind, MessagePage, Namespace, Participant, ParticipantRole,
    PinnedContext, PresenceRecord, PresenceStatus, RowChange,
};
pub use presence_store::PresenceStore;
pub use read_cursor_store::ReadCursorStore;
pub use repository::{
    ChangeSink, ConversationCatalog, MessageLog, PresenceRepository, ReadCursors,
};

/// Default number of messages fetched per history page
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Configuration for the persistence layer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,

    /// Tenant the stores operate in (default: "general")
    pub namespace: Namespace,

    /// Page size used by every history read (default: 50)
    pub page_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tidings-store.db"),
            namespace: Namespace::general(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Open the SQLite database at `db_path` and bring its schema up to date
pub async fn connect(db_path: &std::path::Path) -> Result<DatabaseConnection> {
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| MessagingError::Validation("Invalid database path".into()))?
        .replace('\\', "/");

    let db_url = format!("sqlite:{}?mode=rwc", db_path_str);
    let db = Database::connect(db_url.as_str()).await?;

    migration::Migrator::up(&db, None).await?;

    info!("Message database initialized at {}", db_path.display());
    Ok(db)
}

/// All stores of one namespace, sharing a connection pool
#[derive(Clone)]
pub struct MessagingStores {
    pub directory: Arc<ConversationDirectory>,
    pub messages: Arc<MessageStore>,
    pub read_cursors: Arc<ReadCursorStore>,
    pub presence: Arc<PresenceStore>,
    pub config: StoreConfig,
}

impl MessagingStores {
    /// Connect, migrate and build the stores for `config.namespace`
    pub async fn open(config: StoreConfig, sink: Option<Arc<dyn ChangeSink>>) -> Result<Self> {
        let db = connect(&config.db_path).await?;
        Ok(Self::with_connection(db, config, sink))
    }

    /// Build the stores over an existing, already migrated connection
    pub fn with_connection(
        db: DatabaseConnection,
        config: StoreConfig,
        sink: Option<Arc<dyn ChangeSink>>,
    ) -> Self {
        let namespace = config.namespace.clone();

        let mut directory = ConversationDirectory::new(db.clone(), namespace.clone());
        let mut messages = MessageStore::new(db.clone(), namespace);
        let mut presence = PresenceStore::new(db.clone());
        if let Some(sink) = sink {
            directory = directory.with_change_sink(sink.clone());
            messages = messages.with_change_sink(sink.clone());
            presence = presence.with_change_sink(sink);
        }

        Self {
            directory: Arc::new(directory),
            messages: Arc::new(messages),
            read_cursors: Arc::new(ReadCursorStore::new(db)),
            presence: Arc::new(presence),
            config,
        }
    }
}
