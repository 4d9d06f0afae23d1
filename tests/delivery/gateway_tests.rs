//! Gateway behaviour seen from connected clients.

use pretty_assertions::assert_eq;
use serde_json::json;

use realtime_chat::domain::events::{BusEvent, MessagePersisted};
use realtime_chat::domain::services::{reconcile, TimelineEntry};
use realtime_chat::domain::Snowflake;
use realtime_chat::infrastructure::coordination::PresenceStore;

use crate::common::{random_username, test_settings, token_for, TestApp};

fn names(events: &[serde_json::Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["event"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_authenticate_subscribes_to_existing_rooms() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    let user = Snowflake::new(100);
    app.store.add_member(user, room);

    let client = app.login(100, &random_username()).await;

    assert!(client.session.is_subscribed(room));
    assert_eq!(
        app.coordination.presence.connection_of(user).await.unwrap(),
        Some(client.session.connection_id.clone())
    );
    assert!(app.coordination.presence.is_in_room(user, room).await.unwrap());
    assert_eq!(app.gateway().authenticated_count(), 1);
}

#[tokio::test]
async fn test_authenticated_payload() {
    let app = TestApp::new();
    let mut client = app.connect();
    let token = token_for(&app.settings, 42, "alice", 3600);

    client
        .send(json!({"event": "authenticate", "data": {"token": token}}))
        .await;

    let events = client.events();
    assert_eq!(
        events[0],
        json!({"event": "authenticated", "data": {"success": true, "userId": "42", "username": "alice"}})
    );
}

#[tokio::test]
async fn test_expired_token_allows_one_retry() {
    let app = TestApp::new();
    let mut client = app.connect();
    let expired = token_for(&app.settings, 5, "bob", -3600);

    client
        .send(json!({"event": "authenticate", "data": {"token": expired}}))
        .await;
    let events = client.events();
    assert_eq!(names(&events), vec!["authentication_error"]);
    assert_eq!(events[0]["data"]["message"], "Token expired");

    let fresh = token_for(&app.settings, 5, "bob", 3600);
    client
        .send(json!({"event": "authenticate", "data": {"token": fresh}}))
        .await;
    assert_eq!(names(&client.events()), vec!["authenticated"]);
}

#[tokio::test]
async fn test_second_expired_token_closes_connection() {
    let app = TestApp::new();
    let mut client = app.connect();
    let expired = token_for(&app.settings, 5, "bob", -3600);

    for _ in 0..2 {
        client
            .send(json!({"event": "authenticate", "data": {"token": expired}}))
            .await;
    }

    assert_eq!(
        names(&client.events()),
        vec!["authentication_error", "authentication_error", "close"]
    );
}

#[tokio::test]
async fn test_invalid_token_closes_immediately() {
    let app = TestApp::new();
    let mut client = app.connect();

    client
        .send(json!({"event": "authenticate", "data": {"token": "not-a-jwt"}}))
        .await;

    let events = client.events();
    assert_eq!(names(&events), vec!["authentication_error", "close"]);
    assert_eq!(events[0]["data"]["message"], "Invalid token");
    assert!(!client.session.is_authenticated());
}

#[tokio::test]
async fn test_requests_before_authentication_are_rejected() {
    let app = TestApp::new();
    app.store.add_room(1, false, false);
    let mut client = app.connect();

    client
        .send(json!({"event": "join_room", "data": {"roomId": "1"}}))
        .await;

    assert_eq!(
        client.events(),
        vec![json!({"event": "error", "data": {"message": "Not authenticated"}})]
    );
    assert_eq!(app.room_queue_stats().await.join_queue, 0);
}

#[tokio::test]
async fn test_malformed_frame() {
    let app = TestApp::new();
    let mut client = app.connect();

    client.gateway.handle_frame(&client.session, "{not json").await;

    assert_eq!(
        client.events(),
        vec![json!({"event": "error", "data": {"message": "Invalid message format"}})]
    );
}

#[tokio::test]
async fn test_join_then_send_is_confirmed_once() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    let user = Snowflake::new(10);
    let mut client = app.login(10, "carol").await;
    client.events();

    client
        .send(json!({"event": "join_room", "data": {"roomId": "1"}}))
        .await;
    assert_eq!(names(&client.events()), vec!["room_join_queued"]);

    app.settle().await;
    assert_eq!(
        client.take("room_joined"),
        vec![json!({"event": "room_joined", "data": {"roomId": "1"}})]
    );
    assert!(app.store.is_member(user, room));

    client
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": "hello"}}))
        .await;
    let optimistic = client.take("new_message");
    assert_eq!(optimistic.len(), 1);
    assert_eq!(optimistic[0]["data"]["pending"], true);
    assert_eq!(optimistic[0]["data"]["content"], "hello");
    let temp_id = optimistic[0]["data"]["tempId"].as_str().unwrap().to_string();

    app.settle().await;
    let confirmed = client.take("message_confirmed");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0]["data"]["tempId"], temp_id.as_str());

    let stored = app.store.messages();
    assert_eq!(stored.len(), 1);
    assert_eq!(confirmed[0]["data"]["message"]["id"], stored[0].id.to_string());

    // a redelivered persistence event is not confirmed twice
    app.gateway().handle_bus_event(BusEvent::MessagePersisted(MessagePersisted {
        temp_id,
        message: stored[0].clone(),
    }));
    assert!(client.take("message_confirmed").is_empty());
}

#[tokio::test]
async fn test_join_when_already_subscribed_confirms_immediately() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(10), room);
    let mut client = app.login(10, "carol").await;
    client.events();

    client
        .send(json!({"event": "join_room", "data": {"roomId": "1"}}))
        .await;

    assert_eq!(names(&client.events()), vec!["room_joined"]);
    assert_eq!(app.room_queue_stats().await.join_queue, 0);
}

#[tokio::test]
async fn test_join_announced_to_room_occupants() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(1), room);
    let mut occupant = app.login(1, "dave").await;
    let mut joiner = app.login(2, "erin").await;
    occupant.events();
    joiner.events();

    joiner
        .send(json!({"event": "join_room", "data": {"roomId": "1"}}))
        .await;
    app.settle().await;

    assert_eq!(
        occupant.take("user_joined_room"),
        vec![json!({"event": "user_joined_room", "data": {"userId": "2", "username": "erin", "roomId": "1"}})]
    );
    assert!(joiner.take("user_joined_room").is_empty());
}

#[tokio::test]
async fn test_send_without_membership_is_rejected() {
    let app = TestApp::new();
    app.store.add_room(1, false, false);
    let mut client = app.login(10, "carol").await;
    client.events();

    client
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": "hi"}}))
        .await;

    assert_eq!(
        client.events(),
        vec![json!({"event": "error", "data": {"message": "You are not a member of this room"}})]
    );
    assert_eq!(app.message_queue_size().await, 0);
}

#[tokio::test]
async fn test_send_rejects_oversized_content() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(10), room);
    let mut client = app.login(10, "carol").await;
    client.events();

    client
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": "x".repeat(4001)}}))
        .await;

    assert_eq!(names(&client.events()), vec!["error"]);
    assert_eq!(app.message_queue_size().await, 0);
}

#[tokio::test]
async fn test_durable_member_without_subscription_can_send() {
    let app = TestApp::new();
    app.store.add_room(1, false, false);
    let mut client = app.login(10, "carol").await;
    client.events();

    // membership created after authentication, so no subscription yet
    app.store.add_member(Snowflake::new(10), Snowflake::new(1));
    client
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": "late"}}))
        .await;

    assert_eq!(client.take("new_message").len(), 1);
    assert!(client.session.is_subscribed(Snowflake::new(1)));
    assert_eq!(app.message_queue_size().await, 1);
}

#[tokio::test]
async fn test_leave_notifies_remaining_members() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(1), room);
    app.store.add_member(Snowflake::new(2), room);
    let mut leaver = app.login(1, "frank").await;
    let mut stayer = app.login(2, "grace").await;
    leaver.events();
    stayer.events();

    leaver
        .send(json!({"event": "leave_room", "data": {"roomId": "1"}}))
        .await;

    assert_eq!(names(&leaver.events()), vec!["room_left"]);
    assert_eq!(
        stayer.take("user_left_room"),
        vec![json!({"event": "user_left_room", "data": {"userId": "1", "username": "frank", "roomId": "1"}})]
    );
    assert!(!leaver.session.is_subscribed(room));

    app.settle().await;
    assert!(!app.store.is_member(Snowflake::new(1), room));
    assert!(leaver.take("user_left_room").is_empty());
}

#[tokio::test]
async fn test_reauthenticating_as_another_user_drops_previous_rooms() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(5), room);
    app.store.add_member(Snowflake::new(7), room);
    let mut switching = app.login(5, "grace").await;
    let mut member = app.login(7, "judy").await;
    app.pump_bus();
    switching.events();
    member.events();

    let token = token_for(&app.settings, 6, "mallory", 3600);
    switching
        .send(json!({"event": "authenticate", "data": {"token": token}}))
        .await;

    assert_eq!(names(&switching.events()), vec!["authenticated"]);
    assert!(!switching.session.is_subscribed(room));
    assert_eq!(app.gateway().room_connections(room), vec![member.session.connection_id.clone()]);
    assert_eq!(
        app.coordination.presence.connection_of(Snowflake::new(5)).await.unwrap(),
        None
    );
    assert!(!app.coordination.presence.is_in_room(Snowflake::new(5), room).await.unwrap());

    app.pump_bus();
    let changes = member.take("user_status_changed");
    let statuses: Vec<(String, String)> = changes
        .iter()
        .map(|c| {
            (
                c["data"]["userId"].as_str().unwrap().to_string(),
                c["data"]["status"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        statuses,
        vec![("5".to_string(), "OFFLINE".to_string()), ("6".to_string(), "ONLINE".to_string())]
    );

    switching
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": "injected"}}))
        .await;
    assert_eq!(
        switching.events(),
        vec![json!({"event": "error", "data": {"message": "You are not a member of this room"}})]
    );
    assert!(member.take("new_message").is_empty());
    assert_eq!(app.message_queue_size().await, 0);
}

#[tokio::test]
async fn test_reauthenticating_as_same_user_keeps_rooms() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(5), room);
    let mut client = app.login(5, "grace").await;
    client.events();

    let token = token_for(&app.settings, 5, "grace", 3600);
    client
        .send(json!({"event": "authenticate", "data": {"token": token}}))
        .await;

    assert_eq!(names(&client.events()), vec!["authenticated"]);
    assert!(client.session.is_subscribed(room));
    assert_eq!(
        app.coordination.presence.connection_of(Snowflake::new(5)).await.unwrap(),
        Some(client.session.connection_id.clone())
    );
    assert_eq!(app.gateway().authenticated_count(), 1);
}

#[tokio::test]
async fn test_disconnect_publishes_offline_once() {
    let app = TestApp::new();
    let mut watcher = app.login(1, "heidi").await;
    let leaving = app.login(2, "ivan").await;
    watcher.events();

    leaving.disconnect().await;
    leaving.disconnect().await;
    app.pump_bus();

    let changes = watcher.take("user_status_changed");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["data"]["userId"], "2");
    assert_eq!(changes[0]["data"]["status"], "OFFLINE");
    assert_eq!(
        app.coordination.presence.connection_of(Snowflake::new(2)).await.unwrap(),
        None
    );
    assert_eq!(app.gateway().session_count(), 1);
}

#[tokio::test]
async fn test_stale_disconnect_keeps_newer_connection() {
    let app = TestApp::new();
    let mut watcher = app.login(1, "heidi").await;
    let old = app.login(2, "ivan").await;
    let new = app.login(2, "ivan").await;
    watcher.events();

    old.disconnect().await;
    app.pump_bus();

    assert!(watcher.take("user_status_changed").is_empty());
    assert_eq!(
        app.coordination.presence.connection_of(Snowflake::new(2)).await.unwrap(),
        Some(new.session.connection_id.clone())
    );
}

#[tokio::test]
async fn test_unconfirmed_message_times_out_then_late_confirm() {
    let mut settings = test_settings();
    settings.websocket.pending_timeout_secs = 0;
    let app = TestApp::with_settings(settings);
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(10), room);
    let mut client = app.login(10, "judy").await;
    client.events();

    client
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": "slow"}}))
        .await;
    client.events();

    assert_eq!(app.gateway().expire_pending(), 1);
    let failed = client.take("message_failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["data"]["reason"], "timeout");

    app.settle().await;
    assert_eq!(client.take("message_confirmed").len(), 1);
    assert_eq!(app.gateway().expire_pending(), 0);
}

#[tokio::test]
async fn test_typing_excludes_sender() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(1), room);
    app.store.add_member(Snowflake::new(2), room);
    let mut typist = app.login(1, "kim").await;
    let mut reader = app.login(2, "lee").await;
    typist.events();
    reader.events();

    typist
        .send(json!({"event": "typing_start", "data": {"roomId": "1"}}))
        .await;
    app.pump_bus();

    assert!(typist.events().is_empty());
    assert_eq!(
        reader.events(),
        vec![json!({"event": "user_typing", "data": {"userId": "1", "username": "kim", "roomId": "1", "isTyping": true}})]
    );
}

#[tokio::test]
async fn test_typing_outside_room_is_rejected() {
    let app = TestApp::new();
    app.store.add_room(1, false, false);
    let mut client = app.login(1, "kim").await;
    client.events();

    client
        .send(json!({"event": "typing_stop", "data": {"roomId": "1"}}))
        .await;

    assert_eq!(names(&client.events()), vec!["error"]);
}

#[tokio::test]
async fn test_mark_as_read_notifies_room() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(1), room);
    app.store.add_member(Snowflake::new(2), room);
    let message = app.store.insert_message(500, room, Snowflake::new(2), "read me");
    let mut reader = app.login(1, "mia").await;
    let mut author = app.login(2, "ned").await;
    reader.events();
    author.events();

    reader
        .send(json!({"event": "mark_as_read", "data": {"messageId": message.to_string()}}))
        .await;

    assert!(reader.events().is_empty());
    let receipts = author.take("message_read");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0]["data"]["messageId"], "500");
    assert_eq!(receipts[0]["data"]["userId"], "1");
}

#[tokio::test]
async fn test_update_status_reaches_everyone() {
    let app = TestApp::new();
    let mut first = app.login(1, "olga").await;
    let mut second = app.login(2, "pete").await;
    first.events();
    second.events();

    second
        .send(json!({"event": "update_status", "data": {"status": "idle"}}))
        .await;
    app.pump_bus();

    for client in [&mut first, &mut second] {
        let changes = client.take("user_status_changed");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["data"]["status"], "IDLE");
    }

    second
        .send(json!({"event": "update_status", "data": {"status": "busy"}}))
        .await;
    assert_eq!(
        second.events(),
        vec![json!({"event": "error", "data": {"message": "Invalid status: busy"}})]
    );
}

#[tokio::test]
async fn test_cross_gateway_delivery_without_duplicates() {
    let app = TestApp::cluster(2, test_settings());
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(1), room);
    app.store.add_member(Snowflake::new(2), room);
    let mut sender = app.login_on(0, 1, "quinn").await;
    let mut remote = app.login_on(1, 2, "rosa").await;
    sender.events();
    remote.events();

    sender
        .send(json!({"event": "send_message", "data": {"roomId": "1", "content": "across"}}))
        .await;
    app.settle().await;

    let sender_events = sender.events();
    let remote_events = remote.events();
    for events in [&sender_events, &remote_events] {
        assert_eq!(names(events), vec!["new_message", "message_confirmed"]);
    }
    assert_eq!(
        remote_events[0]["data"]["tempId"],
        sender_events[0]["data"]["tempId"]
    );
    assert_eq!(app.store.messages().len(), 1);
}

#[tokio::test]
async fn test_cross_gateway_join_answers_original_connection() {
    let app = TestApp::cluster(2, test_settings());
    app.store.add_room(1, false, false);
    let mut joiner = app.login_on(1, 3, "sam").await;
    joiner.events();

    joiner
        .send(json!({"event": "join_room", "data": {"roomId": "1"}}))
        .await;
    // the worker of node 0 processes the request
    app.settle().await;

    assert_eq!(joiner.take("room_joined").len(), 1);
    assert!(joiner.session.is_subscribed(Snowflake::new(1)));
    assert!(app.node(0).gateway().room_connections(Snowflake::new(1)).is_empty());
}

#[tokio::test]
async fn test_client_timeline_converges_after_retries() {
    let app = TestApp::new();
    let room = app.store.add_room(1, false, false);
    app.store.add_member(Snowflake::new(10), room);
    app.store.failing_creates.store(2, std::sync::atomic::Ordering::SeqCst);
    let mut client = app.login(10, "uma").await;
    client.events();

    for content in ["one", "two"] {
        client
            .send(json!({"event": "send_message", "data": {"roomId": "1", "content": content}}))
            .await;
    }
    app.settle().await;

    let timeline = client
        .raw_events()
        .into_iter()
        .flatten()
        .filter_map(|event| event.delivery())
        .fold(Vec::new(), reconcile);

    assert_eq!(timeline.len(), 2);
    assert!(timeline
        .iter()
        .all(|entry| matches!(entry, TimelineEntry::Delivered { .. })));
}
