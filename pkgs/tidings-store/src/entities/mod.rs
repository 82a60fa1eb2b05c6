//! Sea-ORM entities for tidings-store

pub mod conversation_participants;
pub mod conversations;
pub mod direct_conversation_keys;
pub mod messages;
pub mod presence;

pub use conversation_participants::Entity as ConversationParticipant;
pub use conversations::Entity as Conversation;
pub use direct_conversation_keys::Entity as DirectConversationKey;
pub use messages::Entity as Message;
pub use presence::Entity as Presence;
