//! Message persistence through the queue worker.

use std::sync::atomic::Ordering;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use realtime_chat::domain::Snowflake;
use realtime_chat::infrastructure::coordination::{keys, QueueStore};

use crate::common::{test_settings, TestApp, TestClient};

async fn member_in_room(app: &TestApp, user_id: i64) -> TestClient {
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(user_id), room);
    let mut client = app.login(user_id, "writer").await;
    client.events();
    client
}

async fn say(client: &TestClient, content: &str) {
    client
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": content}}))
        .await;
}

#[tokio::test]
async fn test_messages_persist_in_enqueue_order() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;

    for n in 0..5 {
        say(&client, &format!("message {n}")).await;
    }
    assert_eq!(app.message_queue_size().await, 5);

    app.settle().await;

    let contents: Vec<String> = app.store.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(
        contents,
        (0..5).map(|n| format!("message {n}")).collect::<Vec<_>>()
    );
    assert_eq!(client.take("message_confirmed").len(), 5);
    assert_eq!(app.message_queue_size().await, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;
    app.store.failing_creates.store(2, Ordering::SeqCst);

    say(&client, "eventually").await;
    app.settle().await;

    let events = client.events();
    assert_eq!(
        events.iter().filter(|e| e["event"] == "message_confirmed").count(),
        1
    );
    assert!(events.iter().all(|e| e["event"] != "message_failed"));
    assert_eq!(app.store.messages().len(), 1);
}

#[tokio::test]
async fn test_constraint_violation_drops_without_retry() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;
    app.store.rejected_creates.store(1, Ordering::SeqCst);

    say(&client, "orphaned").await;
    assert_eq!(app.run_message_batch().await, 1);
    assert_eq!(app.message_queue_size().await, 0);

    app.settle().await;
    let failed = client.take("message_failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["data"]["reason"], "Request conflicts with stored data");
    assert!(app.store.messages().is_empty());
}

#[tokio::test]
async fn test_retry_ceiling_drops_message() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;
    app.store.failing_creates.store(3, Ordering::SeqCst);

    say(&client, "doomed").await;
    let temp_id = client.take("new_message")[0]["data"]["tempId"].clone();

    // three attempts, each ending in a transient failure
    for _ in 0..3 {
        assert_eq!(app.run_message_batch().await, 1);
    }
    assert_eq!(app.message_queue_size().await, 0);
    app.pump_bus();

    assert_eq!(
        client.take("message_failed"),
        vec![json!({
            "event": "message_failed",
            "data": {"tempId": temp_id, "roomId": "1", "reason": "Message could not be saved"}
        })]
    );
    assert!(app.store.messages().is_empty());
    assert_eq!(app.store.failing_creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_requeued_message_persists_after_later_one() {
    let mut settings = test_settings();
    settings.queue.batch_size = 1;
    let app = TestApp::with_settings(settings);
    let client = member_in_room(&app, 1).await;
    app.store.failing_creates.store(1, Ordering::SeqCst);

    say(&client, "first").await;
    say(&client, "second").await;
    app.settle().await;

    let contents: Vec<String> = app.store.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["second", "first"]);
}

#[tokio::test]
async fn test_muted_member_is_dropped_without_retry() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;
    app.store
        .set_muted_until(Snowflake::new(1), Snowflake::new(1), Utc::now() + Duration::hours(1));

    say(&client, "shh").await;
    assert_eq!(app.run_message_batch().await, 1);
    assert_eq!(app.message_queue_size().await, 0);
    app.pump_bus();

    let failed = client.take("message_failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["data"]["reason"], "You are muted in this room");
    assert!(app.store.messages().is_empty());
}

#[tokio::test]
async fn test_banned_member_is_dropped() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;
    app.store.ban(Snowflake::new(1), Snowflake::new(1));

    say(&client, "still here?").await;
    app.settle().await;

    let failed = client.take("message_failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["data"]["reason"], "You are banned from this room");
    assert!(app.store.messages().is_empty());
}

#[tokio::test]
async fn test_reply_to_missing_message_is_dropped() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;

    client
        .send(json!({
            "event": "send_message",
            "data": {"roomId": "1", "content": "re:", "replyToId": "999"}
        }))
        .await;
    app.settle().await;

    let failed = client.take("message_failed");
    assert_eq!(failed[0]["data"]["reason"], "Reply target message not found");
}

#[tokio::test]
async fn test_reply_to_live_message_persists() {
    let app = TestApp::new();
    let mut client = member_in_room(&app, 1).await;
    let parent = app
        .store
        .insert_message(77, Snowflake::new(1), Snowflake::new(1), "parent");

    client
        .send(json!({
            "event": "send_message",
            "data": {"roomId": "1", "content": "child", "replyToId": parent.to_string()}
        }))
        .await;
    app.settle().await;

    assert_eq!(client.take("message_confirmed").len(), 1);
    let stored = app.store.messages();
    assert_eq!(stored[1].reply_to_id, Some(parent));
}

#[tokio::test]
async fn test_unparsable_items_are_discarded() {
    let app = TestApp::new();
    app.coordination
        .queues
        .push(keys::MESSAGE_QUEUE, "{broken".to_string())
        .await
        .unwrap();

    assert_eq!(app.run_message_batch().await, 1);
    assert_eq!(app.message_queue_size().await, 0);
    assert!(app.store.messages().is_empty());
}

#[tokio::test]
async fn test_clear_discards_queued_messages() {
    let app = TestApp::new();
    let client = member_in_room(&app, 1).await;
    say(&client, "gone").await;

    app.node(0).core.state.message_queue.clear().await.unwrap();

    assert_eq!(app.message_queue_size().await, 0);
    assert_eq!(app.run_message_batch().await, 0);
}
