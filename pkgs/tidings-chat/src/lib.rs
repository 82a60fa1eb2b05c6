//! Tidings Chat - client-side orchestration of direct messaging
//!
//! # Architecture
//!
//! - **ChatSession**: one open conversation. Sends optimistically, folds
//!   append responses and realtime echoes into a single [`Timeline`], pages
//!   history and advances the read cursor in the background.
//! - **PresenceTracker**: heartbeat lifecycle with `start()`,
//!   `set_visible()` and `stop()`; [`effective_status`] applies the
//!   staleness rule readers must use.
//! - **ConversationListAggregator**: a user's conversations with peer
//!   profile, last-message preview and unread count.
//! - **Messenger**: wires the above for one namespace together with the
//!   host's identity, profile and blob storage collaborators.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidings_chat::{
//!     InMemoryBlobStorage, InMemoryProfiles, Messenger, MessengerConfig, StaticIdentity,
//! };
//! use tidings_realtime::RealtimeHub;
//! use tidings_store::{ChangeSink, MessageDraft, MessagingStores, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Arc::new(RealtimeHub::new());
//! let sink: Arc<dyn ChangeSink> = hub.clone();
//! let stores = MessagingStores::open(StoreConfig::default(), Some(sink)).await?;
//! let messenger = Messenger::new(
//!     stores,
//!     hub,
//!     Arc::new(StaticIdentity::signed_in("alice")),
//!     Arc::new(InMemoryProfiles::new()),
//!     Arc::new(InMemoryBlobStorage::new()),
//!     MessengerConfig::default(),
//! );
//!
//! let chat = messenger.open_chat("bob", None).await?;
//! chat.send(MessageDraft::text("Hello!")).await?;
//! chat.mark_as_read();
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod inbox;
pub mod messenger;
pub mod presence;
pub mod session;
pub mod timeline;

pub use collaborators::{
    BlobStorage, IdentityProvider, InMemoryBlobStorage, InMemoryProfiles, Profile,
    ProfileDirectory, StaticIdentity,
};
pub use config::{MessengerConfig, PresenceConfig, SessionConfig};
pub use error::{ChatError, Result};
pub use inbox::{
    ConversationListAggregator, ConversationSummary, InboxCatchUp, InboxMembership, ListUpdate,
};
pub use messenger::Messenger;
pub use presence::{effective_status, is_reachable, PresenceTracker};
pub use session::{ChatSession, MediaUpload, SessionContext};
pub use timeline::{Applied, LocalMessage, Timeline, TimelineEntry};
