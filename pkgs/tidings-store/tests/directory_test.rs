// Copyright 2026 Tidings Team.
//
// Tests for ConversationDirectory

mod common;

use std::sync::Arc;

use common::{create_test_db, create_test_db_at_version, RecordingSink};
use sea_orm::{EntityTrait, PaginatorTrait};
use tempfile::NamedTempFile;
use tidings_store::entities::{conversation_participants, conversations, direct_conversation_keys};
use tidings_store::migration::{Migrator, MigratorTrait, LEGACY_SCHEMA_MIGRATIONS};
use tidings_store::{
    ConversationDirectory, ConversationKind, MessagingError, Namespace, PinnedContext, RowChange,
};

#[tokio::test]
async fn test_find_or_create_is_symmetric_and_stable() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let directory = ConversationDirectory::new(db.clone(), Namespace::general());

    let first = directory
        .find_or_create_direct("alice", "bob", None)
        .await
        .expect("Failed to create conversation");
    let again = directory
        .find_or_create_direct("alice", "bob", None)
        .await
        .unwrap();
    let reversed = directory
        .find_or_create_direct("bob", "alice", None)
        .await
        .unwrap();

    assert_eq!(first, again);
    assert_eq!(first, reversed);
    assert_eq!(conversations::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(
        conversation_participants::Entity::find()
            .count(&db)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_concurrent_creation_converges_on_one_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let directory = Arc::new(ConversationDirectory::new(db.clone(), Namespace::general()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let directory = directory.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                directory.find_or_create_direct("alice", "bob", None).await
            } else {
                directory.find_or_create_direct("bob", "alice", None).await
            }
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().expect("Creation failed"));
    }

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(conversations::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(
        conversation_participants::Entity::find()
            .count(&db)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_self_chat_is_rejected() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let directory = ConversationDirectory::new(db, Namespace::general());

    let result = directory.find_or_create_direct("alice", "alice", None).await;
    assert!(matches!(result, Err(MessagingError::InvalidParticipant(_))));
}

#[tokio::test]
async fn test_missing_actor_requires_auth() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let directory = ConversationDirectory::new(db, Namespace::general());

    let result = directory.find_or_create_direct("", "bob", None).await;
    assert!(matches!(result, Err(MessagingError::AuthRequired)));
}

#[tokio::test]
async fn test_pinned_context_is_stored_and_refreshed() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let directory = ConversationDirectory::new(db, Namespace::marketplace());

    let bike = PinnedContext::new("listing-1")
        .with_title("Road bike")
        .with_price(250.0);
    let id = directory
        .find_or_create_direct("buyer", "seller", Some(bike))
        .await
        .unwrap();

    let conversation = directory.get(&id).await.unwrap().unwrap();
    assert_eq!(conversation.kind, ConversationKind::Direct);
    assert_eq!(conversation.pinned.as_ref().unwrap().item_id, "listing-1");
    assert_eq!(conversation.pinned.as_ref().unwrap().price, Some(250.0));

    let helmet = PinnedContext::new("listing-2").with_title("Helmet");
    let same = directory
        .find_or_create_direct("seller", "buyer", Some(helmet))
        .await
        .unwrap();
    assert_eq!(same, id);

    let conversation = directory.get(&id).await.unwrap().unwrap();
    let pinned = conversation.pinned.unwrap();
    assert_eq!(pinned.item_id, "listing-2");
    assert_eq!(pinned.title.as_deref(), Some("Helmet"));
    assert_eq!(pinned.price, None);
}

#[tokio::test]
async fn test_namespaces_do_not_share_conversations() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let general = ConversationDirectory::new(db.clone(), Namespace::general());
    let marketplace = ConversationDirectory::new(db, Namespace::marketplace());

    let a = general
        .find_or_create_direct("alice", "bob", None)
        .await
        .unwrap();
    let b = marketplace
        .find_or_create_direct("alice", "bob", None)
        .await
        .unwrap();

    assert_ne!(a, b);
    assert_eq!(general.conversation_ids_for("alice").await.unwrap(), vec![a.clone()]);
    assert_eq!(marketplace.conversation_ids_for("alice").await.unwrap(), vec![b]);
    assert!(marketplace.get(&a).await.unwrap().is_none());
}

#[tokio::test]
async fn test_legacy_schema_uses_intersection_lookup() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db_at_version(&temp_file, Some(LEGACY_SCHEMA_MIGRATIONS)).await;
    let directory = ConversationDirectory::new(db.clone(), Namespace::general());

    let first = directory
        .find_or_create_direct("alice", "bob", None)
        .await
        .expect("Compatibility path should create the conversation");
    assert!(!directory.uses_keyed_creation());

    let second = directory
        .find_or_create_direct("bob", "alice", None)
        .await
        .unwrap();
    assert_eq!(first, second);

    // A third party gets a separate conversation
    let other = directory
        .find_or_create_direct("alice", "carol", None)
        .await
        .unwrap();
    assert_ne!(first, other);
    assert_eq!(conversations::Entity::find().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_upgrade_keeps_conversations_created_without_keys() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db_at_version(&temp_file, Some(LEGACY_SCHEMA_MIGRATIONS)).await;

    let general = ConversationDirectory::new(db.clone(), Namespace::general());
    let marketplace = ConversationDirectory::new(db.clone(), Namespace::marketplace());
    let before = general
        .find_or_create_direct("alice", "bob", None)
        .await
        .unwrap();
    let listing = marketplace
        .find_or_create_direct("bob", "alice", None)
        .await
        .unwrap();

    Migrator::up(&db, None).await.expect("Failed to upgrade schema");
    assert_eq!(direct_conversation_keys::Entity::find().count(&db).await.unwrap(), 2);

    let general = ConversationDirectory::new(db.clone(), Namespace::general());
    let after = general
        .find_or_create_direct("bob", "alice", None)
        .await
        .unwrap();
    assert!(general.uses_keyed_creation());
    assert_eq!(before, after);

    let marketplace = ConversationDirectory::new(db.clone(), Namespace::marketplace());
    assert_eq!(
        marketplace
            .find_or_create_direct("alice", "bob", None)
            .await
            .unwrap(),
        listing
    );
    assert_eq!(conversations::Entity::find().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_participants_are_listed_per_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let directory = ConversationDirectory::new(db, Namespace::general());

    let ab = directory
        .find_or_create_direct("alice", "bob", None)
        .await
        .unwrap();
    let ac = directory
        .find_or_create_direct("alice", "carol", None)
        .await
        .unwrap();

    let mut ids = directory.conversation_ids_for("alice").await.unwrap();
    ids.sort();
    let mut expected = vec![ab.clone(), ac.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    let participants = directory.participants(&[ab.clone()]).await.unwrap();
    let mut users: Vec<_> = participants.iter().map(|p| p.user_id.as_str()).collect();
    users.sort();
    assert_eq!(users, vec!["alice", "bob"]);

    let conversations = directory.conversations(&ids).await.unwrap();
    assert_eq!(conversations.len(), 2);
}

#[tokio::test]
async fn test_new_participants_are_published_once() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let sink = RecordingSink::new();
    let directory =
        ConversationDirectory::new(db.clone(), Namespace::general()).with_change_sink(sink.clone());

    let conversation_id = directory
        .find_or_create_direct("alice", "bob", None)
        .await
        .unwrap();
    directory
        .find_or_create_direct("bob", "alice", None)
        .await
        .unwrap();

    let changes = sink.taken();
    assert_eq!(changes.len(), 2);
    let mut users: Vec<_> = changes
        .iter()
        .map(|change| match change {
            RowChange::ParticipantAdded(p) => {
                assert_eq!(p.conversation_id, conversation_id);
                p.user_id.clone()
            }
            other => panic!("unexpected change {:?}", other),
        })
        .collect();
    users.sort();
    assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
}
