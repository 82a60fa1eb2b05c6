// Copyright 2026 Tidings Team.
//
// Tests for RealtimeHub and Subscription

mod common;

use std::sync::Arc;

use common::{inserted, WAIT};
use tidings_realtime::{ChangeFilter, RealtimeBackend, RealtimeError, RealtimeHub, Topic};
use tidings_store::{ChangeSink, RowChange};
use tokio::time::timeout;

#[tokio::test]
async fn test_subscription_receives_only_its_topic() {
    let hub = RealtimeHub::new();
    let mut subscription = hub
        .subscribe(Topic::Conversation("c-1".into()), None)
        .await
        .unwrap();

    hub.publish(inserted("m-1", "c-2"));
    hub.publish(inserted("m-2", "c-1"));

    let change = timeout(WAIT, subscription.next()).await.unwrap().unwrap();
    assert_eq!(change.message().unwrap().id, "m-2");
}

#[tokio::test]
async fn test_filter_narrows_topic() {
    let hub = RealtimeHub::new();
    let filter: ChangeFilter =
        Arc::new(|change: &RowChange| change.message().map_or(false, |m| m.id != "m-skip"));
    let mut subscription = hub
        .subscribe(Topic::Conversation("c-1".into()), Some(filter))
        .await
        .unwrap();

    hub.publish(inserted("m-skip", "c-1"));
    hub.publish(inserted("m-keep", "c-1"));

    let change = timeout(WAIT, subscription.next()).await.unwrap().unwrap();
    assert_eq!(change.message().unwrap().id, "m-keep");
}

#[tokio::test]
async fn test_hub_is_a_change_sink() {
    let hub = Arc::new(RealtimeHub::new());
    let mut subscription = hub
        .subscribe(Topic::Conversation("c-1".into()), None)
        .await
        .unwrap();

    let sink: Arc<dyn ChangeSink> = hub.clone();
    sink.publish(inserted("m-1", "c-1"));

    let change = timeout(WAIT, subscription.next()).await.unwrap().unwrap();
    assert_eq!(change.message().unwrap().id, "m-1");
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let hub = RealtimeHub::new();
    let mut first = hub.subscribe(Topic::Presence, None).await.unwrap();
    let second = hub.subscribe(Topic::Presence, None).await.unwrap();
    assert_eq!(hub.active_subscriptions(), 2);

    first.unsubscribe();
    first.unsubscribe();
    assert!(!first.is_active());
    assert_eq!(hub.active_subscriptions(), 1);
    assert_eq!(first.next().await, Err(RealtimeError::Disconnected));

    drop(first);
    assert_eq!(hub.active_subscriptions(), 1);
    drop(second);
    assert_eq!(hub.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_interrupt_disconnects_after_buffered_changes() {
    let hub = RealtimeHub::new();
    let mut subscription = hub
        .subscribe(Topic::Conversation("c-1".into()), None)
        .await
        .unwrap();

    hub.publish(inserted("m-1", "c-1"));
    hub.interrupt();
    hub.publish(inserted("m-2", "c-1"));

    let change = timeout(WAIT, subscription.next()).await.unwrap().unwrap();
    assert_eq!(change.message().unwrap().id, "m-1");
    let end = timeout(WAIT, subscription.next()).await.unwrap();
    assert_eq!(end, Err(RealtimeError::Disconnected));
    assert_eq!(hub.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_unavailable_hub_refuses_subscriptions() {
    let hub = RealtimeHub::new();
    hub.set_available(false);

    let refused = hub.subscribe(Topic::Presence, None).await;
    assert!(matches!(refused, Err(RealtimeError::Unavailable(_))));
    assert_eq!(hub.active_subscriptions(), 0);

    hub.set_available(true);
    assert!(hub.subscribe(Topic::Presence, None).await.is_ok());
}

#[tokio::test]
async fn test_lagging_subscriber_is_disconnected() {
    let hub = RealtimeHub::with_capacity(2);
    let mut subscription = hub
        .subscribe(Topic::Conversation("c-1".into()), None)
        .await
        .unwrap();

    for i in 0..5 {
        hub.publish(inserted(&format!("m-{}", i), "c-1"));
    }

    let end = timeout(WAIT, subscription.next()).await.unwrap();
    assert_eq!(end, Err(RealtimeError::Disconnected));
    assert!(!subscription.is_active());
}
