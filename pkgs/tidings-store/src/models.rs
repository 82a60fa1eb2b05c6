//! Domain types shared by the directory, message, read-cursor and presence
//! stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entities::{conversation_participants, conversations, messages, presence};
use crate::error::{MessagingError, Result};

/// Tenant a set of conversations lives in. The general and marketplace
/// messaging surfaces share one implementation and differ only here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn general() -> Self {
        Self::new("general")
    }

    pub fn marketplace() -> Self {
        Self::new("marketplace")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::general()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = MessagingError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(MessagingError::InvalidRecord(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Conversation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

string_enum!(ConversationKind { Direct => "direct", Group => "group" });

/// Participant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Member,
    Admin,
}

string_enum!(ParticipantRole { Member => "member", Admin => "admin" });

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Voice,
    Image,
    System,
}

string_enum!(MessageKind {
    Text => "text",
    Voice => "voice",
    Image => "image",
    System => "system",
});

/// Presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

string_enum!(PresenceStatus {
    Online => "online",
    Away => "away",
    Offline => "offline",
});

/// Item attached to a conversation for contextual display, e.g. a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedContext {
    pub item_id: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<f64>,
}

impl PinnedContext {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            title: None,
            image_url: None,
            price: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }
}

/// Conversation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub namespace: Namespace,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub pinned: Option<PinnedContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<conversations::Model> for Conversation {
    type Error = MessagingError;

    fn try_from(model: conversations::Model) -> Result<Self> {
        let pinned = model.pinned_item_id.map(|item_id| PinnedContext {
            item_id,
            title: model.pinned_item_title,
            image_url: model.pinned_item_image,
            price: model.pinned_item_price,
        });

        Ok(Self {
            id: model.id,
            namespace: Namespace::new(model.namespace),
            kind: model.kind.parse()?,
            name: model.name,
            pinned,
            created_at: from_millis(model.created_at)?,
            updated_at: from_millis(model.updated_at)?,
        })
    }
}

/// Participant model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: DateTime<Utc>,
}

impl TryFrom<conversation_participants::Model> for Participant {
    type Error = MessagingError;

    fn try_from(model: conversation_participants::Model) -> Result<Self> {
        Ok(Self {
            id: model.id,
            conversation_id: model.conversation_id,
            user_id: model.user_id,
            role: model.role.parse()?,
            joined_at: from_millis(model.joined_at)?,
            last_read_at: from_millis(model.last_read_at)?,
        })
    }
}

/// Position of a message in its conversation. Persisted messages are
/// strictly ordered by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

/// Persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub client_ref: Option<String>,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub media_duration: Option<i32>,
    pub reply_to_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl TryFrom<messages::Model> for Message {
    type Error = MessagingError;

    fn try_from(model: messages::Model) -> Result<Self> {
        Ok(Self {
            id: model.id,
            conversation_id: model.conversation_id,
            sender_id: model.sender_id,
            client_ref: model.client_ref,
            content: model.content,
            kind: model.kind.parse()?,
            media_url: model.media_url,
            media_duration: model.media_duration,
            reply_to_id: model.reply_to_id,
            created_at: from_millis(model.created_at)?,
            updated_at: from_millis(model.updated_at)?,
            deleted_at: model.deleted_at.map(from_millis).transpose()?,
        })
    }
}

/// One page of history, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor to pass as `before` for the next older page, `None` once the
    /// beginning of the conversation has been reached
    pub older: Option<MessageCursor>,
}

/// Payload for a new message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_duration: Option<i32>,
    pub reply_to_id: Option<String>,
    pub client_ref: Option<String>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: Some(content.into()),
            media_url: None,
            media_duration: None,
            reply_to_id: None,
            client_ref: None,
        }
    }

    pub fn image(media_url: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Image,
            content: None,
            media_url: Some(media_url.into()),
            media_duration: None,
            reply_to_id: None,
            client_ref: None,
        }
    }

    pub fn voice(media_url: impl Into<String>, duration_secs: i32) -> Self {
        Self {
            kind: MessageKind::Voice,
            content: None,
            media_url: Some(media_url.into()),
            media_duration: Some(duration_secs),
            reply_to_id: None,
            client_ref: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.content = Some(caption.into());
        self
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to_id = Some(message_id.into());
        self
    }

    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    /// Check the payload against its kind. Runs before any I/O so a
    /// malformed draft never reaches the backend.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            MessageKind::Text => {
                let empty = self
                    .content
                    .as_deref()
                    .map(|c| c.trim().is_empty())
                    .unwrap_or(true);
                if empty {
                    return Err(MessagingError::Validation(
                        "text message requires non-empty content".into(),
                    ));
                }
            }
            MessageKind::Image => {
                require_media_url(self.media_url.as_deref(), "image")?;
            }
            MessageKind::Voice => {
                require_media_url(self.media_url.as_deref(), "voice")?;
                match self.media_duration {
                    Some(duration) if duration > 0 => {}
                    _ => {
                        return Err(MessagingError::Validation(
                            "voice message requires a positive media_duration".into(),
                        ))
                    }
                }
            }
            MessageKind::System => {
                return Err(MessagingError::Validation(
                    "system messages cannot be sent by participants".into(),
                ));
            }
        }
        Ok(())
    }
}

fn require_media_url(url: Option<&str>, kind: &str) -> Result<()> {
    match url {
        Some(url) if !url.trim().is_empty() => Ok(()),
        _ => Err(MessagingError::Validation(format!(
            "{} message requires media_url",
            kind
        ))),
    }
}

/// Advisory presence of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
}

impl TryFrom<presence::Model> for PresenceRecord {
    type Error = MessagingError;

    fn try_from(model: presence::Model) -> Result<Self> {
        Ok(Self {
            user_id: model.user_id,
            status: model.status.parse()?,
            last_seen_at: from_millis(model.last_seen_at)?,
        })
    }
}

/// Row operation carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    Insert,
    Update,
}

/// Committed row change, as delivered to realtime subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowChange {
    MessageInserted(Message),
    MessageUpdated(Message),
    ParticipantAdded(Participant),
    PresenceUpserted(PresenceRecord),
}

impl RowChange {
    pub fn operation(&self) -> ChangeOperation {
        match self {
            RowChange::MessageInserted(_) | RowChange::ParticipantAdded(_) => {
                ChangeOperation::Insert
            }
            RowChange::MessageUpdated(_) | RowChange::PresenceUpserted(_) => {
                ChangeOperation::Update
            }
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            RowChange::MessageInserted(m) | RowChange::MessageUpdated(m) => Some(m),
            RowChange::ParticipantAdded(_) | RowChange::PresenceUpserted(_) => None,
        }
    }

    /// Conversation the changed row belongs to, if any
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            RowChange::MessageInserted(m) | RowChange::MessageUpdated(m) => {
                Some(&m.conversation_id)
            }
            RowChange::ParticipantAdded(p) => Some(&p.conversation_id),
            RowChange::PresenceUpserted(_) => None,
        }
    }

    /// Latest modification time of the row, used as the catch-up watermark
    pub fn watermark(&self) -> DateTime<Utc> {
        match self {
            RowChange::MessageInserted(m) | RowChange::MessageUpdated(m) => m.updated_at,
            RowChange::ParticipantAdded(p) => p.joined_at,
            RowChange::PresenceUpserted(p) => p.last_seen_at,
        }
    }

    /// Classify a stored message row the way the change feed would have
    pub fn from_message(message: Message) -> Self {
        if message.is_deleted() {
            RowChange::MessageUpdated(message)
        } else {
            RowChange::MessageInserted(message)
        }
    }
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| MessagingError::InvalidRecord(format!("timestamp out of range: {}", ms)))
}

/// Current time truncated to the millisecond precision the database keeps
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now().timestamp_millis();
    DateTime::from_timestamp_millis(now).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_draft_requires_content() {
        assert!(MessageDraft::text("Hello").validate().is_ok());
        assert!(matches!(
            MessageDraft::text("   \n").validate(),
            Err(MessagingError::Validation(_))
        ));
    }

    #[test]
    fn test_media_drafts_require_media_fields() {
        let mut image = MessageDraft::image("https://cdn.example/a.png");
        assert!(image.validate().is_ok());
        image.media_url = None;
        assert!(matches!(image.validate(), Err(MessagingError::Validation(_))));

        let mut voice = MessageDraft::voice("https://cdn.example/a.ogg", 12);
        assert!(voice.validate().is_ok());
        voice.media_duration = None;
        assert!(matches!(voice.validate(), Err(MessagingError::Validation(_))));
    }

    #[test]
    fn test_system_drafts_are_rejected() {
        let mut draft = MessageDraft::text("joined");
        draft.kind = MessageKind::System;
        assert!(matches!(draft.validate(), Err(MessagingError::Validation(_))));
    }

    #[test]
    fn test_cursor_orders_by_time_then_id() {
        let t = now_millis();
        let a = MessageCursor { created_at: t, id: "a".into() };
        let b = MessageCursor { created_at: t, id: "b".into() };
        let later = MessageCursor {
            created_at: t + chrono::Duration::milliseconds(1),
            id: "0".into(),
        };
        assert!(a < b);
        assert!(b < later);
    }

    #[test]
    fn test_enum_round_trip_through_column_text() {
        for kind in [
            MessageKind::Text,
            MessageKind::Voice,
            MessageKind::Image,
            MessageKind::System,
        ] {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
        assert!("video".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_presence_record_serialization() {
        let record = PresenceRecord {
            user_id: "user-a".into(),
            status: PresenceStatus::Away,
            last_seen_at: now_millis(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"away\""));
        let back: PresenceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
