//! Presence tracker - heartbeat lifecycle and the staleness rule
//!
//! Stored presence is advisory. Nothing expires a row on the server, so a
//! user whose client vanished keeps `status = online` forever; readers must
//! go through [`effective_status`] instead of trusting the column.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tidings_store::{PresenceRecord, PresenceRepository, PresenceStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PresenceConfig;

/// Status a viewer should assume, taking heartbeat staleness into account.
///
/// A record not refreshed within two heartbeat intervals counts as offline.
pub fn effective_status(
    record: &PresenceRecord,
    now: DateTime<Utc>,
    heartbeat_interval: Duration,
) -> PresenceStatus {
    let stale_after = chrono::Duration::from_std(heartbeat_interval * 2)
        .unwrap_or_else(|_| chrono::Duration::MAX);
    if now - record.last_seen_at >= stale_after {
        return PresenceStatus::Offline;
    }
    record.status
}

/// Whether the peer should be treated as online right now
pub fn is_reachable(
    record: &PresenceRecord,
    now: DateTime<Utc>,
    heartbeat_interval: Duration,
) -> bool {
    effective_status(record, now, heartbeat_interval) == PresenceStatus::Online
}

struct Heartbeat {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Publishes the presence of one user while started
pub struct PresenceTracker {
    user_id: String,
    repository: Arc<dyn PresenceRepository>,
    config: PresenceConfig,
    visible: Arc<AtomicBool>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl PresenceTracker {
    pub fn new(
        user_id: impl Into<String>,
        repository: Arc<dyn PresenceRepository>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            repository,
            config,
            visible: Arc::new(AtomicBool::new(true)),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_running(&self) -> bool {
        self.heartbeat.lock().is_some()
    }

    /// Start the heartbeat. The first beat is sent immediately. Calling
    /// `start` on a running tracker does nothing.
    pub fn start(&self) {
        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::beat(
            self.user_id.clone(),
            self.repository.clone(),
            self.config.heartbeat_interval,
            self.visible.clone(),
            cancel.clone(),
        ));
        *heartbeat = Some(Heartbeat { cancel, task });
        info!(
            "Presence heartbeat started for {} every {:?}",
            self.user_id, self.config.heartbeat_interval
        );
    }

    async fn beat(
        user_id: String,
        repository: Arc<dyn PresenceRepository>,
        interval: Duration,
        visible: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let status = if visible.load(Ordering::Acquire) {
                PresenceStatus::Online
            } else {
                PresenceStatus::Away
            };
            if let Err(e) = repository.upsert(&user_id, status).await {
                warn!("Presence heartbeat for {} failed: {}", user_id, e);
            }
        }
        debug!("Presence heartbeat for {} stopped", user_id);
    }

    /// Record a visibility change straight away; later heartbeats carry the
    /// same status
    pub async fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
        if !self.is_running() {
            return;
        }

        let status = if visible {
            PresenceStatus::Online
        } else {
            PresenceStatus::Away
        };
        if let Err(e) = self.repository.upsert(&self.user_id, status).await {
            warn!("Failed to set {} {}: {}", self.user_id, status, e);
        }
    }

    /// Stop the heartbeat and mark the user offline, best effort
    pub async fn stop(&self) {
        let Some(heartbeat) = self.heartbeat.lock().take() else {
            return;
        };
        heartbeat.cancel.cancel();
        if let Err(e) = heartbeat.task.await {
            warn!("Presence heartbeat task for {} ended abnormally: {}", self.user_id, e);
        }

        match self
            .repository
            .upsert(&self.user_id, PresenceStatus::Offline)
            .await
        {
            Ok(_) => info!("Presence of {} set offline", self.user_id),
            Err(e) => warn!("Failed to set {} offline: {}", self.user_id, e),
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.cancel.cancel();
        }
    }
}
