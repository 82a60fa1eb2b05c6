// Copyright 2026 Tidings Team.
//
// Shared helpers for tidings-realtime integration tests

#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use tidings_realtime::{ChannelEvent, ConnectionState};
use tidings_store::{Message, MessageKind, RowChange};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn message(id: &str, conversation_id: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: "alice".to_string(),
        client_ref: None,
        content: Some(format!("body of {}", id)),
        kind: MessageKind::Text,
        media_url: None,
        media_duration: None,
        reply_to_id: None,
        created_at: at,
        updated_at: at,
        deleted_at: None,
    }
}

pub fn inserted(id: &str, conversation_id: &str) -> RowChange {
    RowChange::MessageInserted(message(id, conversation_id, Utc::now()))
}

/// Next change event, skipping state transitions
pub async fn next_change(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> RowChange {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(ChannelEvent::Change(change)) => return change,
                Some(ChannelEvent::State(_)) => continue,
                None => panic!("channel ended while waiting for a change"),
            }
        }
    })
    .await
    .expect("timed out waiting for a change")
}

/// Consume events until `state` is reported, failing on any change event
pub async fn expect_state(
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    state: ConnectionState,
) {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(ChannelEvent::State(s)) if s == state => return,
                Some(ChannelEvent::State(_)) => continue,
                Some(ChannelEvent::Change(change)) => {
                    panic!("unexpected change while waiting for {:?}: {:?}", state, change)
                }
                None => panic!("channel ended while waiting for {:?}", state),
            }
        }
    })
    .await
    .expect("timed out waiting for state")
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true")
}
