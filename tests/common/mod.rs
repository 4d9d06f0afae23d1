//! Common Test Utilities
//!
//! An in-memory durable store with failure injection, token minting and a
//! harness that runs one or more gateway nodes over shared in-memory
//! coordination. Bus events are pumped by hand so tests stay deterministic.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fake::faker::internet::en::Username;
use fake::Fake;
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use realtime_chat::application::queues::RoomQueueStats;
use realtime_chat::application::services::Claims;
use realtime_chat::config::Settings;
use realtime_chat::domain::events::BusEvent;
use realtime_chat::domain::{
    Membership, MembershipRepository, MessageRepository, NewMessage, PersistedMessage, Room,
    RoomRepository, Snowflake,
};
use realtime_chat::infrastructure::coordination::Coordination;
use realtime_chat::infrastructure::health::HealthProbe;
use realtime_chat::presentation::websocket::{ConnectedSession, Gateway, Outbound, ServerEvent};
use realtime_chat::shared::error::AppError;
use realtime_chat::startup::{Core, Repositories};

fn transient() -> AppError {
    AppError::Database(sqlx::Error::PoolTimedOut)
}

/// Foreign key failure as a Postgres driver would report it.
#[derive(Debug)]
struct ForeignKeyViolation;

impl std::fmt::Display for ForeignKeyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("insert or update violates foreign key constraint")
    }
}

impl std::error::Error for ForeignKeyViolation {}

impl sqlx::error::DatabaseError for ForeignKeyViolation {
    fn message(&self) -> &str {
        "insert or update violates foreign key constraint"
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        sqlx::error::ErrorKind::ForeignKeyViolation
    }
}

/// Take one unit from a failure budget.
fn take(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Durable store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<Snowflake, Room>>,
    memberships: Mutex<HashMap<(Snowflake, Snowflake), Membership>>,
    bans: Mutex<HashSet<(Snowflake, Snowflake)>>,
    messages: Mutex<Vec<PersistedMessage>>,
    receipts: Mutex<HashMap<(Snowflake, Snowflake), DateTime<Utc>>>,
    /// Rows created through `insert`, per (user, room), including rows
    /// later deleted
    created: Mutex<HashMap<(Snowflake, Snowflake), usize>>,
    /// Upcoming `create` calls that fail transiently
    pub failing_creates: AtomicU32,
    /// Upcoming `create` calls rejected by a foreign key
    pub rejected_creates: AtomicU32,
    /// Upcoming membership `insert` calls that fail transiently
    pub failing_inserts: AtomicU32,
    /// Upcoming membership `delete` calls that fail transiently
    pub failing_deletes: AtomicU32,
}

impl MemoryStore {
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            rooms: self.clone(),
            memberships: self.clone(),
            messages: self.clone(),
        }
    }

    pub fn add_room(&self, id: i64, is_private: bool, is_direct: bool) -> Snowflake {
        let id = Snowflake::new(id);
        self.rooms.lock().insert(
            id,
            Room {
                id,
                name: format!("room-{}", id),
                is_private,
                is_direct,
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn add_member(&self, user_id: Snowflake, room_id: Snowflake) {
        self.memberships
            .lock()
            .insert((user_id, room_id), Membership::new(room_id, user_id));
    }

    pub fn set_muted_until(&self, user_id: Snowflake, room_id: Snowflake, until: DateTime<Utc>) {
        if let Some(m) = self.memberships.lock().get_mut(&(user_id, room_id)) {
            m.muted_until = Some(until);
        }
    }

    pub fn ban(&self, user_id: Snowflake, room_id: Snowflake) {
        self.bans.lock().insert((user_id, room_id));
    }

    /// How many times `insert` actually created a row for the pair.
    pub fn memberships_created(&self, user_id: Snowflake, room_id: Snowflake) -> usize {
        self.created
            .lock()
            .get(&(user_id, room_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_member(&self, user_id: Snowflake, room_id: Snowflake) -> bool {
        self.memberships.lock().contains_key(&(user_id, room_id))
    }

    /// Persisted messages in insertion order.
    pub fn messages(&self) -> Vec<PersistedMessage> {
        self.messages.lock().clone()
    }

    pub fn insert_message(&self, id: i64, room_id: Snowflake, user_id: Snowflake, content: &str) -> Snowflake {
        let now = Utc::now();
        let id = Snowflake::new(id);
        self.messages.lock().push(PersistedMessage {
            id,
            room_id,
            user_id,
            content: content.into(),
            reply_to_id: None,
            edited: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        });
        id
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn find_by_id(&self, id: Snowflake) -> Result<Option<Room>, AppError> {
        Ok(self.rooms.lock().get(&id).cloned())
    }
}

#[async_trait]
impl MembershipRepository for MemoryStore {
    async fn find(&self, user_id: Snowflake, room_id: Snowflake) -> Result<Option<Membership>, AppError> {
        Ok(self.memberships.lock().get(&(user_id, room_id)).cloned())
    }

    async fn find_room_ids_by_user(&self, user_id: Snowflake) -> Result<Vec<Snowflake>, AppError> {
        Ok(self
            .memberships
            .lock()
            .keys()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, room)| *room)
            .collect())
    }

    async fn insert(&self, membership: &Membership) -> Result<bool, AppError> {
        if take(&self.failing_inserts) {
            return Err(transient());
        }
        let mut memberships = self.memberships.lock();
        let key = (membership.user_id, membership.room_id);
        if memberships.contains_key(&key) {
            return Ok(false);
        }
        memberships.insert(key, membership.clone());
        *self.created.lock().entry(key).or_default() += 1;
        Ok(true)
    }

    async fn delete(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError> {
        if take(&self.failing_deletes) {
            return Err(transient());
        }
        Ok(self.memberships.lock().remove(&(user_id, room_id)).is_some())
    }

    async fn is_banned(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError> {
        Ok(self.bans.lock().contains(&(user_id, room_id)))
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn find_by_id(&self, id: Snowflake) -> Result<Option<PersistedMessage>, AppError> {
        Ok(self.messages.lock().iter().find(|m| m.id == id).cloned())
    }

    async fn find_live_in_room(
        &self,
        id: Snowflake,
        room_id: Snowflake,
    ) -> Result<Option<PersistedMessage>, AppError> {
        Ok(self
            .messages
            .lock()
            .iter()
            .find(|m| m.id == id && m.room_id == room_id && !m.deleted)
            .cloned())
    }

    async fn create(&self, message: &NewMessage) -> Result<PersistedMessage, AppError> {
        if take(&self.failing_creates) {
            return Err(transient());
        }
        if take(&self.rejected_creates) {
            return Err(AppError::Database(sqlx::Error::Database(Box::new(ForeignKeyViolation))));
        }
        let now = Utc::now();
        let persisted = PersistedMessage {
            id: message.id,
            room_id: message.room_id,
            user_id: message.user_id,
            content: message.content.clone(),
            reply_to_id: message.reply_to_id,
            edited: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.messages.lock().push(persisted.clone());
        Ok(persisted)
    }

    async fn mark_read(&self, message_id: Snowflake, user_id: Snowflake) -> Result<DateTime<Utc>, AppError> {
        let now = Utc::now();
        self.receipts.lock().insert((message_id, user_id), now);
        Ok(now)
    }
}

/// Probe with a fixed outcome.
pub struct StubProbe {
    pub name: &'static str,
    pub critical: bool,
    pub healthy: bool,
}

#[async_trait]
impl HealthProbe for StubProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    async fn check(&self) -> Result<(), AppError> {
        if self.healthy {
            Ok(())
        } else {
            Err(AppError::Internal(format!("{} is down", self.name)))
        }
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.queue.join_retry_delay_ms = 1;
    settings.queue.poll_interval_ms = 10;
    settings
}

/// Mint a token the gateway accepts.
pub fn token_for(settings: &Settings, user_id: i64, username: &str, ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: now + ttl_secs,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt.secret.as_bytes()),
    )
    .expect("token encodes")
}

pub fn random_username() -> String {
    Username().fake()
}

/// One gateway process in the test cluster.
pub struct Node {
    pub core: Core,
    bus: Mutex<broadcast::Receiver<BusEvent>>,
}

impl Node {
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.core.state.gateway
    }
}

/// Nodes sharing one durable store and one coordination store.
pub struct TestApp {
    pub settings: Settings,
    pub store: Arc<MemoryStore>,
    pub coordination: Coordination,
    pub nodes: Vec<Node>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::cluster(1, test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::cluster(1, settings)
    }

    pub fn cluster(size: usize, settings: Settings) -> Self {
        let store = Arc::new(MemoryStore::default());
        let coordination = Coordination::in_memory(Duration::from_secs(3600));

        let nodes = (0..size)
            .map(|_| {
                let core = Core::assemble(
                    settings.clone(),
                    store.repositories(),
                    coordination.clone(),
                    Vec::new(),
                );
                Node {
                    bus: Mutex::new(coordination.bus.subscribe()),
                    core,
                }
            })
            .collect();

        Self {
            settings,
            store,
            coordination,
            nodes,
        }
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        self.node(0).gateway()
    }

    /// Deliver every published bus event to every node.
    pub fn pump_bus(&self) -> usize {
        let mut delivered = 0;
        for node in &self.nodes {
            let mut rx = node.bus.lock();
            while let Ok(event) = rx.try_recv() {
                node.gateway().handle_bus_event(event);
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn message_queue_size(&self) -> usize {
        self.node(0)
            .core
            .state
            .message_queue
            .size()
            .await
            .expect("queue size")
    }

    pub async fn room_queue_stats(&self) -> RoomQueueStats {
        self.node(0)
            .core
            .state
            .room_queue
            .stats()
            .await
            .expect("queue stats")
    }

    pub async fn run_message_batch(&self) -> usize {
        self.node(0)
            .core
            .message_worker
            .process_batch()
            .await
            .expect("message batch")
    }

    pub async fn run_room_batch(&self) -> usize {
        self.node(0)
            .core
            .room_worker
            .process_batch()
            .await
            .expect("room batch")
    }

    /// Process queues and pump the bus until nothing moves.
    pub async fn settle(&self) {
        loop {
            let moved = self.run_room_batch().await + self.run_message_batch().await + self.pump_bus();
            if moved == 0 {
                break;
            }
        }
    }

    pub fn connect_to(&self, node: usize) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::clone(self.node(node).gateway());
        let session = gateway.connect(tx);
        TestClient { gateway, session, rx }
    }

    pub fn connect(&self) -> TestClient {
        self.connect_to(0)
    }

    /// Connect and authenticate, draining the handshake events.
    pub async fn login_on(&self, node: usize, user_id: i64, username: &str) -> TestClient {
        let mut client = self.connect_to(node);
        let token = token_for(&self.settings, user_id, username, 3600);
        client
            .send(serde_json::json!({"event": "authenticate", "data": {"token": token}}))
            .await;
        self.pump_bus();
        let events = client.events();
        assert_eq!(events[0]["event"], "authenticated", "unexpected handshake: {events:?}");
        client
    }

    pub async fn login(&self, user_id: i64, username: &str) -> TestClient {
        self.login_on(0, user_id, username).await
    }
}

/// A socket as seen by the test: frames in, events out.
pub struct TestClient {
    pub gateway: Arc<Gateway>,
    pub session: Arc<ConnectedSession>,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl TestClient {
    pub async fn send(&self, frame: Value) {
        self.gateway.handle_frame(&self.session, &frame.to_string()).await;
    }

    /// Drain queued events as sent, `None` standing for a close request.
    pub fn raw_events(&mut self) -> Vec<Option<ServerEvent>> {
        let mut events = Vec::new();
        while let Ok(outbound) = self.rx.try_recv() {
            events.push(match outbound {
                Outbound::Event(event) => Some(event),
                Outbound::Close => None,
            });
        }
        events
    }

    /// Drain queued events as JSON. A close request shows up as
    /// `{"event": "close"}`.
    pub fn events(&mut self) -> Vec<Value> {
        self.raw_events()
            .into_iter()
            .map(|event| match event {
                Some(event) => serde_json::to_value(event).expect("event serializes"),
                None => serde_json::json!({"event": "close"}),
            })
            .collect()
    }

    /// Drain and keep only events with the given name.
    pub fn take(&mut self, name: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e["event"] == name)
            .collect()
    }

    pub async fn disconnect(&self) {
        self.gateway.disconnect(&self.session).await;
    }
}
