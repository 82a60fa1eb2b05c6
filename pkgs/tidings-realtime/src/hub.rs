//! In-process realtime backend
//!
//! [`RealtimeHub`] fans committed row changes out to subscribers over a
//! broadcast channel. Stores publish into it through [`ChangeSink`]; sessions
//! read from it through [`RealtimeBackend::subscribe`]. Every subscriber sees
//! every change and applies its topic predicate locally, so a slow subscriber
//! never holds up publishers. One that falls behind by more than the channel
//! capacity is cut off and has to reconnect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidings_store::{ChangeSink, RowChange};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{RealtimeError, Result};
use crate::topic::{ChangeFilter, Topic};

/// Default number of changes buffered per subscriber
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Source of topic subscriptions
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Start listening to `topic`, optionally narrowed by `filter`
    async fn subscribe(&self, topic: Topic, filter: Option<ChangeFilter>) -> Result<Subscription>;
}

struct HubState {
    sender: broadcast::Sender<RowChange>,
    available: bool,
}

/// Broadcast hub shared by all sessions of a process
pub struct RealtimeHub {
    state: Mutex<HubState>,
    capacity: usize,
    active: Arc<AtomicUsize>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(HubState {
                sender,
                available: true,
            }),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Drop every live connection. Subscribers drain what was already
    /// buffered for them and then observe a disconnect.
    pub fn interrupt(&self) {
        let (sender, _) = broadcast::channel(self.capacity);
        let previous = std::mem::replace(&mut self.state.lock().sender, sender);
        info!(
            "Interrupting {} realtime connection(s)",
            previous.receiver_count()
        );
    }

    /// Accept or refuse new subscriptions. Existing ones are unaffected.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
        debug!("Realtime hub available: {}", available);
    }

    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// Number of subscriptions not yet released
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Deliver a change to every current subscriber
    pub fn publish(&self, change: RowChange) {
        let state = self.state.lock();
        // No receivers is not an error: nobody is listening right now.
        let delivered = state.sender.send(change).unwrap_or(0);
        debug!("Published change to {} receiver(s)", delivered);
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSink for RealtimeHub {
    fn publish(&self, change: RowChange) {
        RealtimeHub::publish(self, change);
    }
}

#[async_trait]
impl RealtimeBackend for RealtimeHub {
    async fn subscribe(&self, topic: Topic, filter: Option<ChangeFilter>) -> Result<Subscription> {
        let receiver = {
            let state = self.state.lock();
            if !state.available {
                return Err(RealtimeError::Unavailable(format!(
                    "cannot subscribe to {}",
                    topic
                )));
            }
            state.sender.subscribe()
        };

        debug!("Subscribed to {}", topic);
        Ok(Subscription::new(
            receiver,
            topic,
            filter,
            self.active.clone(),
        ))
    }
}

/// A live topic subscription.
///
/// Released by [`Subscription::unsubscribe`] or on drop, whichever comes
/// first; releasing twice is a no-op.
pub struct Subscription {
    receiver: broadcast::Receiver<RowChange>,
    topic: Topic,
    filter: Option<ChangeFilter>,
    active: Arc<AtomicUsize>,
    released: bool,
}

impl Subscription {
    fn new(
        receiver: broadcast::Receiver<RowChange>,
        topic: Topic,
        filter: Option<ChangeFilter>,
        active: Arc<AtomicUsize>,
    ) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self {
            receiver,
            topic,
            filter,
            active,
            released: false,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.released
    }

    /// Wait for the next change matching the topic and filter
    pub async fn next(&mut self) -> Result<RowChange> {
        if self.released {
            return Err(RealtimeError::Disconnected);
        }

        loop {
            match self.receiver.recv().await {
                Ok(change) => {
                    if !self.topic.matches(&change) {
                        continue;
                    }
                    if let Some(filter) = &self.filter {
                        if !filter(&change) {
                            continue;
                        }
                    }
                    return Ok(change);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber of {} fell behind by {} change(s), disconnecting",
                        self.topic, skipped
                    );
                    self.unsubscribe();
                    return Err(RealtimeError::Disconnected);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Connection for {} closed", self.topic);
                    self.unsubscribe();
                    return Err(RealtimeError::Disconnected);
                }
            }
        }
    }

    /// Release the subscription
    pub fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.active.fetch_sub(1, Ordering::AcqRel);
        debug!("Unsubscribed from {}", self.topic);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
