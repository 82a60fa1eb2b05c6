//! Messenger - per-namespace entry point for presentation layers

use std::collections::HashMap;
use std::sync::Arc;

use tidings_realtime::{
    CatchUp, ChannelEvent, ChannelHandle, RealtimeBackend, ResilientChannel, Topic,
};
use tidings_store::{
    now_millis, MessagingError, MessagingStores, Namespace, PinnedContext, PresenceRepository,
    PresenceStatus,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::collaborators::{BlobStorage, IdentityProvider, ProfileDirectory};
use crate::config::MessengerConfig;
use crate::error::Result;
use crate::inbox::{
    ConversationListAggregator, ConversationSummary, InboxCatchUp, InboxMembership,
};
use crate::presence::{effective_status, PresenceTracker};
use crate::session::{ChatSession, SessionContext};

/// Messaging surface of one namespace, e.g. general chat or marketplace
pub struct Messenger {
    stores: MessagingStores,
    realtime: Arc<dyn RealtimeBackend>,
    identity: Arc<dyn IdentityProvider>,
    blobs: Arc<dyn BlobStorage>,
    list: ConversationListAggregator,
    config: MessengerConfig,
}

impl Messenger {
    pub fn new(
        stores: MessagingStores,
        realtime: Arc<dyn RealtimeBackend>,
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileDirectory>,
        blobs: Arc<dyn BlobStorage>,
        mut config: MessengerConfig,
    ) -> Self {
        // History pages have the same size everywhere
        config.session.page_size = stores.config.page_size;

        let list = ConversationListAggregator::new(
            stores.directory.clone(),
            stores.messages.clone(),
            stores.read_cursors.clone(),
            profiles,
        );

        Self {
            stores,
            realtime,
            identity,
            blobs,
            list,
            config,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        self.stores.directory.namespace()
    }

    pub fn stores(&self) -> &MessagingStores {
        &self.stores
    }

    /// The signed-in user
    pub fn actor(&self) -> Result<String> {
        self.identity
            .current_user()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| MessagingError::AuthRequired.into())
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            log: self.stores.messages.clone(),
            read_cursors: self.stores.read_cursors.clone(),
            realtime: self.realtime.clone(),
            blobs: self.blobs.clone(),
        }
    }

    /// Open the direct conversation with `other`, creating it on first use
    pub async fn open_chat(
        &self,
        other: &str,
        pinned: Option<PinnedContext>,
    ) -> Result<ChatSession> {
        let actor = self.actor()?;
        let conversation_id = self
            .stores
            .directory
            .find_or_create_direct(&actor, other, pinned)
            .await?;

        info!(
            "Opening chat between {} and {} in '{}'",
            actor,
            other,
            self.namespace()
        );
        ChatSession::open(
            self.session_context(),
            conversation_id,
            actor,
            self.config.session.clone(),
        )
        .await
    }

    /// Open an existing conversation the actor participates in
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<ChatSession> {
        let actor = self.actor()?;
        if self.stores.directory.get(conversation_id).await?.is_none() {
            return Err(
                MessagingError::NotFound(format!("conversation {}", conversation_id)).into(),
            );
        }

        let participants = self
            .stores
            .directory
            .participants(&[conversation_id.to_string()])
            .await?;
        if !participants.iter().any(|p| p.user_id == actor) {
            return Err(MessagingError::Unauthorized(format!(
                "{} is not a participant of {}",
                actor, conversation_id
            ))
            .into());
        }

        ChatSession::open(
            self.session_context(),
            conversation_id,
            actor,
            self.config.session.clone(),
        )
        .await
    }

    /// The actor's conversations, most recently active first
    pub async fn conversation_list(&self) -> Result<Vec<ConversationSummary>> {
        let actor = self.actor()?;
        self.list.load(&actor).await
    }

    /// New-message notifications for the actor's conversation list.
    /// Fold the events in with [`crate::inbox::apply_change`].
    ///
    /// After every reconnect the channel replays what the outage hid,
    /// conversations created in the meantime included.
    pub async fn watch_inbox(
        &self,
    ) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let actor = self.actor()?;
        // Taken before the membership read so nothing between the two is lost
        let since = now_millis();
        let known = self.stores.directory.conversation_ids_for(&actor).await?;
        debug!("Watching inbox of {} over {} conversation(s)", actor, known.len());

        let membership = InboxMembership::new(actor.clone(), known);
        let catch_up: Arc<dyn CatchUp> = Arc::new(InboxCatchUp::new(
            membership.clone(),
            self.stores.directory.clone(),
            self.stores.messages.clone(),
        ));

        Ok(ResilientChannel::spawn(
            self.realtime.clone(),
            Topic::Inbox(actor),
            Some(membership.filter()),
            Some(catch_up),
            Some(since),
            self.config.session.backoff.clone(),
        ))
    }

    /// Presence changes of every user
    pub fn watch_presence(&self) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>) {
        ResilientChannel::spawn(
            self.realtime.clone(),
            Topic::Presence,
            None,
            None,
            None,
            self.config.session.backoff.clone(),
        )
    }

    /// Heartbeat lifecycle for the actor; call `start()` to begin
    pub fn presence_tracker(&self) -> Result<PresenceTracker> {
        let actor = self.actor()?;
        Ok(PresenceTracker::new(
            actor,
            self.stores.presence.clone(),
            self.config.presence.clone(),
        ))
    }

    /// Staleness-aware status of the given users. Users without any
    /// heartbeat are offline.
    pub async fn presence_of(
        &self,
        user_ids: &[String],
    ) -> Result<HashMap<String, PresenceStatus>> {
        let now = now_millis();
        let interval = self.config.presence.heartbeat_interval;
        let records = self.stores.presence.get_many(user_ids).await?;

        let mut statuses: HashMap<String, PresenceStatus> = user_ids
            .iter()
            .map(|id| (id.clone(), PresenceStatus::Offline))
            .collect();
        for record in records {
            let status = effective_status(&record, now, interval);
            statuses.insert(record.user_id.clone(), status);
        }
        Ok(statuses)
    }
}
