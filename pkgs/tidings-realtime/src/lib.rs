//! Tidings Realtime - push delivery of committed row changes
//!
//! # Architecture
//!
//! - **RealtimeHub**: in-process backend. Stores publish committed changes
//!   into it (it is a [`tidings_store::ChangeSink`]); sessions subscribe to
//!   a [`Topic`] and receive the matching changes.
//! - **Subscription**: one live topic listener, released exactly once.
//! - **ResilientChannel**: wraps a subscription in a
//!   `Connecting → Connected → Disconnected` state machine that reconnects
//!   with exponential backoff and replays missed changes through a
//!   [`CatchUp`] source.
//!
//! Delivery is at-least-once: a reconnect may replay changes the consumer
//! has already seen.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidings_realtime::{BackoffPolicy, ChannelEvent, RealtimeHub, ResilientChannel, Topic};
//!
//! # async fn example() {
//! let hub = Arc::new(RealtimeHub::new());
//! let (handle, mut events) = ResilientChannel::spawn(
//!     hub,
//!     Topic::Conversation("conversation-id".into()),
//!     None,
//!     None,
//!     None,
//!     BackoffPolicy::default(),
//! );
//!
//! while let Some(event) = events.recv().await {
//!     if let ChannelEvent::Change(change) = event {
//!         println!("{:?}", change);
//!     }
//! }
//! handle.close();
//! # }
//! ```

pub mod catch_up;
pub mod channel;
pub mod error;
pub mod hub;
pub mod topic;

pub use catch_up::ConversationCatchUp;
pub use channel::{
    BackoffPolicy, CatchUp, ChannelEvent, ChannelHandle, ConnectionState, ResilientChannel,
};
pub use error::{RealtimeError, Result};
pub use hub::{RealtimeBackend, RealtimeHub, Subscription, DEFAULT_HUB_CAPACITY};
pub use topic::{ChangeFilter, Topic};
