//! Resilient channel - keeps a topic subscription alive across outages
//!
//! The channel task subscribes, forwards matching changes, and when the
//! connection drops it waits out an exponential backoff, subscribes again and
//! replays whatever it missed through a [`CatchUp`] source, starting from the
//! watermark of the last change it delivered. Replayed changes may repeat
//! ones already delivered; consumers are expected to de-duplicate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidings_store::RowChange;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::hub::{RealtimeBackend, Subscription};
use crate::topic::{ChangeFilter, Topic};

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// What a channel hands to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ConnectionState),
    Change(RowChange),
}

/// Replays changes missed while disconnected
#[async_trait]
pub trait CatchUp: Send + Sync {
    async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<RowChange>>;
}

/// Exponential reconnect delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt (default: 500ms)
    pub initial: Duration,
    /// Upper bound on any delay (default: 30s)
    pub max: Duration,
    /// Growth factor between consecutive attempts (default: 2)
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let millis = self.initial.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            return self.max;
        }
        Duration::from_millis(millis as u64)
    }
}

/// Control handle of a running channel. Closing is idempotent and also
/// happens when the handle is dropped.
pub struct ChannelHandle {
    topic: Topic,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the channel and release its subscription
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        debug!("Closed channel for {}", self.topic);
    }

    /// Close and wait for the channel task to finish
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Channel task for {} ended abnormally: {}", self.topic, e);
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Spawner for resilient topic channels
pub struct ResilientChannel;

impl ResilientChannel {
    /// Start a channel task for `topic`.
    ///
    /// `since` seeds the catch-up watermark. When it is given the first
    /// connection also replays from it, which covers changes committed
    /// between an initial fetch and the subscription. Without it the channel
    /// only replays after reconnects, from its own start time onwards.
    pub fn spawn(
        backend: Arc<dyn RealtimeBackend>,
        topic: Topic,
        filter: Option<ChangeFilter>,
        catch_up: Option<Arc<dyn CatchUp>>,
        since: Option<DateTime<Utc>>,
        backoff: BackoffPolicy,
    ) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (state_sender, state_receiver) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let worker = ChannelWorker {
            backend,
            topic: topic.clone(),
            filter,
            catch_up,
            backoff,
            replay_on_connect: since.is_some(),
            watermark: since.unwrap_or_else(Utc::now),
            events: event_sender,
            state: state_sender,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        let handle = ChannelHandle {
            topic,
            state: state_receiver,
            cancel,
            task: Some(task),
        };
        (handle, event_receiver)
    }
}

/// Why a connection ended
enum Ended {
    Closed,
    Dropped,
}

struct ChannelWorker {
    backend: Arc<dyn RealtimeBackend>,
    topic: Topic,
    filter: Option<ChangeFilter>,
    catch_up: Option<Arc<dyn CatchUp>>,
    backoff: BackoffPolicy,
    replay_on_connect: bool,
    watermark: DateTime<Utc>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl ChannelWorker {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut replay = self.replay_on_connect;

        loop {
            self.set_state(ConnectionState::Connecting);

            let subscribed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.backend.subscribe(self.topic.clone(), self.filter.clone()) => result,
            };

            match subscribed {
                Ok(subscription) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    info!("Realtime channel for {} connected", self.topic);

                    if replay {
                        self.replay_missed().await;
                    }
                    replay = true;

                    if let Ended::Closed = self.pump(subscription).await {
                        break;
                    }
                    warn!("Realtime channel for {} disconnected", self.topic);
                }
                Err(e) => {
                    warn!("Failed to subscribe to {}: {}", self.topic, e);
                }
            }

            self.set_state(ConnectionState::Disconnected);

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(
                "Reconnecting {} in {:?} (attempt {})",
                self.topic, delay, attempt
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("Realtime channel for {} stopped", self.topic);
    }

    /// Forward changes until the connection ends
    async fn pump(&mut self, mut subscription: Subscription) -> Ended {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                next = subscription.next() => Some(next),
            };
            let Some(next) = next else {
                subscription.unsubscribe();
                return Ended::Closed;
            };

            match next {
                Ok(change) => {
                    if !self.deliver(change) {
                        subscription.unsubscribe();
                        return Ended::Closed;
                    }
                }
                Err(e) => {
                    debug!("Subscription to {} ended: {}", self.topic, e);
                    return Ended::Dropped;
                }
            }
        }
    }

    async fn replay_missed(&mut self) {
        let Some(catch_up) = self.catch_up.clone() else {
            return;
        };

        match catch_up.changes_since(self.watermark).await {
            Ok(changes) => {
                debug!(
                    "Replaying {} missed change(s) on {}",
                    changes.len(),
                    self.topic
                );
                for change in changes {
                    if let Some(filter) = &self.filter {
                        if !filter(&change) {
                            continue;
                        }
                    }
                    if !self.deliver(change) {
                        return;
                    }
                }
            }
            Err(e) => {
                // Live delivery continues; the consumer can refresh manually.
                warn!("Catch-up for {} failed: {}", self.topic, e);
            }
        }
    }

    /// Hand a change to the consumer, returning false once it has gone away
    fn deliver(&mut self, change: RowChange) -> bool {
        let watermark = change.watermark();
        if watermark > self.watermark {
            self.watermark = watermark;
        }
        if self.events.send(ChannelEvent::Change(change)).is_err() {
            debug!("Consumer of {} went away", self.topic);
            self.cancel.cancel();
            return false;
        }
        true
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            // The consumer may already be gone; the state watch still updates.
            let _ = self.events.send(ChannelEvent::State(state));
        }
    }
}
