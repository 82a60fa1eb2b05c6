//! Chat session - one open conversation of one user
//!
//! The session owns a [`Timeline`] and keeps it in sync from three sources:
//! append responses, the conversation's realtime channel and explicit page
//! loads. Sends are optimistic: the entry shows as Pending straight away and
//! the store call runs on its own task, so a send that outlives
//! `send_timeout` is shown as Failed but can still be confirmed later.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tidings_realtime::{
    CatchUp, ChannelEvent, ChannelHandle, ConnectionState, ConversationCatchUp, RealtimeBackend,
    RealtimeError, ResilientChannel, Topic,
};
use tidings_store::{now_millis, MessageDraft, MessageLog, MessagingError, ReadCursors};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::BlobStorage;
use crate::config::SessionConfig;
use crate::error::{ChatError, Result};
use crate::timeline::{LocalMessage, Timeline, TimelineEntry};

/// Services a session talks to
#[derive(Clone)]
pub struct SessionContext {
    pub log: Arc<dyn MessageLog>,
    pub read_cursors: Arc<dyn ReadCursors>,
    pub realtime: Arc<dyn RealtimeBackend>,
    pub blobs: Arc<dyn BlobStorage>,
}

/// Attachment to upload and send
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub bytes: Bytes,
    pub content_type: String,
    /// Voice length in seconds; `None` sends an image
    pub duration_secs: Option<i32>,
    pub caption: Option<String>,
}

impl MediaUpload {
    pub fn image(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            duration_secs: None,
            caption: None,
        }
    }

    pub fn voice(
        bytes: impl Into<Bytes>,
        content_type: impl Into<String>,
        duration_secs: i32,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            duration_secs: Some(duration_secs),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    fn into_draft(self, media_url: String) -> MessageDraft {
        let draft = match self.duration_secs {
            Some(duration) => MessageDraft::voice(media_url, duration),
            None => MessageDraft::image(media_url),
        };
        match self.caption {
            Some(caption) => draft.with_caption(caption),
            None => draft,
        }
    }
}

struct SessionShared {
    conversation_id: String,
    actor: String,
    ctx: SessionContext,
    config: SessionConfig,
    timeline: Mutex<Timeline>,
    version: watch::Sender<u64>,
}

impl SessionShared {
    fn with_timeline<R>(&self, f: impl FnOnce(&mut Timeline) -> R) -> R {
        let result = f(&mut self.timeline.lock());
        self.version.send_modify(|v| *v += 1);
        result
    }
}

/// An open conversation
pub struct ChatSession {
    shared: Arc<SessionShared>,
    channel: ChannelHandle,
}

impl ChatSession {
    /// Load the newest page and start listening for changes
    pub async fn open(
        ctx: SessionContext,
        conversation_id: impl Into<String>,
        actor: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Self> {
        let conversation_id = conversation_id.into();
        let actor = actor.into();

        // Anything committed after this instant is replayed once the
        // channel connects, closing the gap behind the initial page.
        let opened_at = now_millis();
        let page = ctx
            .log
            .page(&conversation_id, None, config.page_size)
            .await?;

        let mut timeline = Timeline::new(config.window_capacity);
        timeline.load_latest(page);

        let catch_up: Arc<dyn CatchUp> = Arc::new(ConversationCatchUp::new(
            ctx.log.clone(),
            conversation_id.clone(),
        ));
        let (channel, events) = ResilientChannel::spawn(
            ctx.realtime.clone(),
            Topic::Conversation(conversation_id.clone()),
            None,
            Some(catch_up),
            Some(opened_at),
            config.backoff.clone(),
        );

        let (version, _) = watch::channel(0);
        let shared = Arc::new(SessionShared {
            conversation_id,
            actor,
            ctx,
            config,
            timeline: Mutex::new(timeline),
            version,
        });

        tokio::spawn(Self::pump(shared.clone(), events));

        info!(
            "Opened chat session for {} in {}",
            shared.actor, shared.conversation_id
        );
        Ok(Self { shared, channel })
    }

    async fn pump(shared: Arc<SessionShared>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Change(change) => {
                    let applied = shared.with_timeline(|t| t.apply_change(&change));
                    debug!(
                        "Applied change to {}: {:?}",
                        shared.conversation_id, applied
                    );
                }
                ChannelEvent::State(state) => {
                    debug!("Session {} is {:?}", shared.conversation_id, state);
                    shared.version.send_modify(|v| *v += 1);
                }
            }
        }
        debug!("Session pump for {} stopped", shared.conversation_id);
    }

    pub fn conversation_id(&self) -> &str {
        &self.shared.conversation_id
    }

    pub fn actor(&self) -> &str {
        &self.shared.actor
    }

    /// Send a message. Validation failures are returned before anything is
    /// shown or sent; every later failure shows up as a Failed entry.
    ///
    /// Returns the entry for the send as it stands once the store answered
    /// or the send timeout elapsed.
    pub async fn send(&self, draft: MessageDraft) -> Result<TimelineEntry> {
        draft.validate()?;

        let correlation_id = format!("tmp-{}", Uuid::new_v4());
        let draft = draft.with_client_ref(correlation_id.clone());
        self.shared.with_timeline(|t| {
            t.push_pending(LocalMessage {
                correlation_id: correlation_id.clone(),
                sender_id: self.shared.actor.clone(),
                draft: draft.clone(),
                created_at: now_millis(),
            })
        });

        self.dispatch(correlation_id, draft).await
    }

    /// Upload an attachment, then send it
    pub async fn send_media(&self, upload: MediaUpload) -> Result<TimelineEntry> {
        if let Some(duration) = upload.duration_secs {
            if duration <= 0 {
                return Err(MessagingError::Validation(
                    "voice message requires a positive duration".into(),
                )
                .into());
            }
        }

        let url = self
            .shared
            .ctx
            .blobs
            .upload(upload.bytes.clone(), &upload.content_type)
            .await?;
        debug!("Uploaded {} attachment to {}", upload.content_type, url);

        self.send(upload.into_draft(url)).await
    }

    /// Send a Failed entry again under the same correlation id
    pub async fn retry(&self, correlation_id: &str) -> Result<TimelineEntry> {
        let local = self
            .shared
            .with_timeline(|t| t.retry(correlation_id))
            .ok_or_else(|| ChatError::UnknownEntry(correlation_id.to_string()))?;

        info!("Retrying send {}", correlation_id);
        self.dispatch(local.correlation_id, local.draft).await
    }

    /// Remove a Failed entry without sending it
    pub fn discard(&self, correlation_id: &str) -> Result<()> {
        if self.shared.with_timeline(|t| t.discard_failed(correlation_id)) {
            Ok(())
        } else {
            Err(ChatError::UnknownEntry(correlation_id.to_string()))
        }
    }

    async fn dispatch(&self, correlation_id: String, draft: MessageDraft) -> Result<TimelineEntry> {
        let shared = self.shared.clone();
        let task_correlation = correlation_id.clone();
        let task = tokio::spawn(async move {
            let result = shared
                .ctx
                .log
                .append(&shared.conversation_id, &shared.actor, draft)
                .await;
            match result {
                Ok(message) => {
                    debug!("Send {} confirmed as {}", task_correlation, message.id);
                    shared.with_timeline(|t| t.apply_message(message));
                }
                Err(e) => {
                    warn!("Send {} failed: {}", task_correlation, e);
                    shared.with_timeline(|t| t.mark_failed(&task_correlation, e.to_string()));
                }
            }
        });

        match tokio::time::timeout(self.shared.config.send_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Send task {} panicked: {}", correlation_id, e);
                self.shared
                    .with_timeline(|t| t.mark_failed(&correlation_id, "send task aborted"));
            }
            Err(_) => {
                // The request keeps running; a late success still confirms.
                warn!(
                    "Send {} not answered within {:?}",
                    correlation_id, self.shared.config.send_timeout
                );
                self.shared
                    .with_timeline(|t| t.mark_failed(&correlation_id, "timed out"));
            }
        }

        self.shared
            .timeline
            .lock()
            .entry(&correlation_id)
            .ok_or(ChatError::UnknownEntry(correlation_id))
    }

    /// Soft-delete one of the actor's messages
    pub async fn delete(&self, message_id: &str) -> Result<()> {
        let message = self
            .shared
            .ctx
            .log
            .soft_delete(message_id, &self.shared.actor)
            .await?;
        self.shared.with_timeline(|t| t.apply_message(message));
        Ok(())
    }

    /// Page further back. Returns the number of messages added; zero once
    /// the beginning of the conversation is loaded.
    pub async fn load_older(&self) -> Result<usize> {
        let Some(before) = self.shared.timeline.lock().older_cursor().cloned() else {
            return Ok(0);
        };

        let page = self
            .shared
            .ctx
            .log
            .page(
                &self.shared.conversation_id,
                Some(&before),
                self.shared.config.page_size,
            )
            .await?;
        Ok(self.shared.with_timeline(|t| t.prepend_older(page)))
    }

    /// Re-read the newest page, e.g. after the connection was degraded
    pub async fn refresh(&self) -> Result<()> {
        let page = self
            .shared
            .ctx
            .log
            .page(
                &self.shared.conversation_id,
                None,
                self.shared.config.page_size,
            )
            .await?;
        self.shared.with_timeline(|t| t.load_latest(page));
        debug!("Refreshed session {}", self.shared.conversation_id);
        Ok(())
    }

    /// Advance the actor's read cursor to now.
    ///
    /// Runs in the background with retries on transient failures; errors
    /// are logged, never returned.
    pub fn mark_as_read(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let attempts = shared.config.read_retry_attempts.max(1);
            for attempt in 0..attempts {
                let result = shared
                    .ctx
                    .read_cursors
                    .advance(&shared.conversation_id, &shared.actor, now_millis())
                    .await;
                match result {
                    Ok(moved) => {
                        debug!(
                            "Read cursor of {} in {} advanced: {}",
                            shared.actor, shared.conversation_id, moved
                        );
                        return;
                    }
                    Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                        let delay = shared.config.backoff.delay(attempt);
                        warn!("Failed to mark as read, retrying in {:?}: {}", delay, e);
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        error!(
                            "Failed to mark {} as read for {}: {}",
                            shared.conversation_id, shared.actor, e
                        );
                        return;
                    }
                }
            }
        })
    }

    /// Unread messages of the actor in this conversation
    pub async fn unread_count(&self) -> Result<u64> {
        Ok(self
            .shared
            .ctx
            .read_cursors
            .unread_count(&self.shared.conversation_id, &self.shared.actor)
            .await?)
    }

    /// Visible entries in display order
    pub fn snapshot(&self) -> Vec<TimelineEntry> {
        self.shared.timeline.lock().entries()
    }

    /// Current entry for a correlation id
    pub fn entry(&self, correlation_id: &str) -> Option<TimelineEntry> {
        self.shared.timeline.lock().entry(correlation_id)
    }

    pub fn has_older(&self) -> bool {
        self.shared.timeline.lock().older_cursor().is_some()
    }

    /// Counter bumped on every timeline or connection change
    pub fn watch_updates(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Wait until the realtime channel is connected
    pub async fn wait_until_connected(&self, limit: Duration) -> Result<()> {
        let mut state = self.channel.watch_state();
        let connected = tokio::time::timeout(limit, async {
            loop {
                if *state.borrow_and_update() == ConnectionState::Connected {
                    return true;
                }
                if state.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;

        match connected {
            Ok(true) => Ok(()),
            _ => Err(RealtimeError::Disconnected.into()),
        }
    }

    /// Stop listening. Safe to call more than once; also happens on drop.
    pub fn close(&self) {
        if self.channel.is_closed() {
            return;
        }
        self.channel.close();
        info!(
            "Closed chat session for {} in {}",
            self.shared.actor, self.shared.conversation_id
        );
    }
}
